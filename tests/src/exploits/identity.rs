//! # Identity Injection
//!
//! Hostile minion and job identifiers sent over a real connection.
//!
//! ## Attack Vectors
//!
//! - Path traversal in the claimed minion ID (`..`, `/etc/passwd`)
//! - NUL, control characters and backslashes in the ID
//! - Oversized IDs
//! - Traversal in the JID of a `JOB_RETURN`
//!
//! ## Expected Defense
//!
//! The master closes the connection without an `AUTH_RESPONSE`, writes
//! nothing under the base directory, and never lets a raw identifier reach
//! a filesystem path.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use fm_01_key_store::KeyAdminApi;
    use fm_02_auth_handshake::challenge_message;
    use master_runtime::transport::{read_message, write_message};
    use master_runtime::MinionError;
    use shared_types::{AuthStatus, WireMessage, MAX_FRAME_LEN, MAX_MINION_ID_LEN};
    use std::path::Path;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn hostile_ids() -> Vec<String> {
        vec![
            "../../etc".into(),
            "..".into(),
            ".".into(),
            "/etc/passwd".into(),
            "web01/../../root".into(),
            "..\\..\\windows".into(),
            "web\\01".into(),
            "web01\0".into(),
            "web\n01".into(),
            "web\x1b[31m01".into(),
            "".into(),
            ".hidden".into(),
            "web 01".into(),
            "a".repeat(MAX_MINION_ID_LEN + 1),
        ]
    }

    /// Everything under `base` except the key store lock.
    fn entries_under(base: &Path) -> Vec<String> {
        let mut found = Vec::new();
        let mut stack = vec![base.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path.clone());
                }
                if path.file_name().is_some_and(|n| n != ".lock") {
                    found.push(path.strip_prefix(base).unwrap().display().to_string());
                }
            }
        }
        found.sort();
        found
    }

    /// Handshake by hand so the test keeps the raw stream.
    async fn raw_session(master: &TestMaster, raw_id: &str) -> TcpStream {
        let mut stream = TcpStream::connect(master.addr).await.unwrap();
        let nonce = match read_message(&mut stream, MAX_FRAME_LEN).await.unwrap() {
            Some(WireMessage::Challenge { nonce }) => nonce,
            other => panic!("expected CHALLENGE, got {other:?}"),
        };
        let key = minion_key();
        let request = WireMessage::AuthRequest {
            raw_id: raw_id.into(),
            public_key_pem: key.public_key().to_pem().unwrap(),
            signature: key.sign(&challenge_message(&nonce, raw_id)),
            nonce,
        };
        write_message(&mut stream, &request, MAX_FRAME_LEN).await.unwrap();
        stream
    }

    async fn expect_eof(stream: &mut TcpStream) {
        let next = tokio::time::timeout(WAIT, read_message(stream, MAX_FRAME_LEN))
            .await
            .unwrap();
        assert!(matches!(next, Ok(None) | Err(_)), "expected close, got {next:?}");
    }

    // =========================================================================
    // MINION ID
    // =========================================================================

    #[tokio::test]
    async fn test_hostile_ids_are_closed_without_response() {
        // Refusals are still archived as events; keep the tree static.
        let master = TestMaster::start(|c| c.jobs.event_return = false).await;
        let before = entries_under(master.base());

        for raw in hostile_ids() {
            let result = master.connect(&raw, minion_key()).await;
            assert!(
                matches!(result, Err(MinionError::Closed)),
                "{raw:?} was not closed: {:?}",
                result.map(|c| c.minion_id().clone())
            );
        }

        assert_eq!(entries_under(master.base()), before);
        assert!(master.container.key_admin().list_all().unwrap().is_empty());
        assert!(master.container.sessions.is_empty());
        assert_eq!(master.container.auth.outstanding_challenges(), 0);

        master.stop().await;
    }

    #[tokio::test]
    async fn test_hostile_id_does_not_poison_valid_minion() {
        let master = TestMaster::start(|_| {}).await;

        let result = master.connect("web01/../web01", minion_key()).await;
        assert!(matches!(result, Err(MinionError::Closed)));

        let conn = master.connect_ready("web01", minion_key()).await;
        assert_eq!(conn.minion_id(), &id("web01"));
        assert_eq!(master.container.key_admin().list_all().unwrap().len(), 1);

        master.stop().await;
    }

    #[tokio::test]
    async fn test_id_at_length_limit_is_accepted() {
        let master = TestMaster::start(|_| {}).await;
        let longest = "a".repeat(MAX_MINION_ID_LEN);

        let conn = master.connect_ready(&longest, minion_key()).await;
        assert_eq!(conn.minion_id().as_str(), longest);

        master.stop().await;
    }

    // =========================================================================
    // JOB ID
    // =========================================================================

    #[tokio::test]
    async fn test_traversal_jid_in_return_closes_connection() {
        let master = TestMaster::start(|_| {}).await;
        let mut stream = raw_session(&master, "web01").await;
        match read_message(&mut stream, MAX_FRAME_LEN).await.unwrap() {
            Some(WireMessage::AuthResponse { status, .. }) => assert_eq!(status, AuthStatus::Accepted),
            other => panic!("expected AUTH_RESPONSE, got {other:?}"),
        }

        // Hand-written, since a JobId cannot hold this value.
        let body = br#"{"type":"JOB_RETURN","jid":"../../etc","frame":{"seq":1,"ciphertext":"00"}}"#;
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
        stream.flush().await.unwrap();

        expect_eof(&mut stream).await;
        assert!(!master.base().join("etc").exists());
        assert!(!master.base().join("job_cache").join("..").join("..").join("etc").exists());

        master.stop().await;
    }

    #[tokio::test]
    async fn test_signature_for_other_id_is_refused() {
        let master = TestMaster::start(|_| {}).await;

        // Signs the challenge for "web02" but claims "web01".
        let mut stream = TcpStream::connect(master.addr).await.unwrap();
        let nonce = match read_message(&mut stream, MAX_FRAME_LEN).await.unwrap() {
            Some(WireMessage::Challenge { nonce }) => nonce,
            other => panic!("expected CHALLENGE, got {other:?}"),
        };
        let key = minion_key();
        let request = WireMessage::AuthRequest {
            raw_id: "web01".into(),
            public_key_pem: key.public_key().to_pem().unwrap(),
            signature: key.sign(&challenge_message(&nonce, "web02")),
            nonce,
        };
        write_message(&mut stream, &request, MAX_FRAME_LEN).await.unwrap();

        match read_message(&mut stream, MAX_FRAME_LEN).await.unwrap() {
            Some(WireMessage::AuthResponse {
                status,
                session_id,
                encrypted_session_key,
            }) => {
                assert_eq!(status, AuthStatus::Denied);
                assert!(session_id.is_none());
                assert!(encrypted_session_key.is_none());
            }
            other => panic!("expected AUTH_RESPONSE, got {other:?}"),
        }
        expect_eof(&mut stream).await;
        assert!(master.container.sessions.is_empty());

        master.stop().await;
    }
}
