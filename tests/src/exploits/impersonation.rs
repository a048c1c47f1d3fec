//! # Impersonation
//!
//! Attempts to act as another minion, either at the handshake or by
//! injecting returns into someone else's session.
//!
//! ## Attack Vectors
//!
//! - A fresh key claiming an already accepted minion ID
//! - A frame sealed in one session submitted under another
//! - A return for a job the minion was not targeted by
//! - A tampered ciphertext
//!
//! ## Expected Defense
//!
//! The stored key is never replaced, the victim's session stays live, and
//! returns are attributed only to the session that sealed them.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use fm_01_key_store::KeyStoreApi;
    use fm_03_secure_channel::{ChannelError, Direction, SecureChannel};
    use fm_04_job_bus::{JobBusError, JobRequest};
    use master_runtime::MinionError;
    use shared_types::{AuthStatus, JobResult, KeyState, TargetSpec};

    fn forged(output: &str) -> JobResult {
        JobResult {
            success: true,
            output: serde_json::json!(output),
        }
    }

    // =========================================================================
    // HANDSHAKE
    // =========================================================================

    #[tokio::test]
    async fn test_foreign_key_cannot_take_over_accepted_id() {
        let master = TestMaster::start(|_| {}).await;
        let victim = master.connect_ready("web01", minion_key()).await;
        let stored = master.container.keys.lookup(&id("web01")).unwrap().unwrap();
        assert_eq!(stored.state, KeyState::Accepted);

        let result = master.connect("web01", attacker_key()).await;
        assert!(matches!(result, Err(MinionError::NotAccepted(AuthStatus::Denied))));

        // Record and session untouched.
        assert_eq!(master.container.keys.lookup(&id("web01")).unwrap().unwrap(), stored);
        let session = master.container.sessions.lookup(&id("web01")).unwrap();
        assert_eq!(session.session_id(), victim.session_id());
        assert!(!session.is_revoked());

        master.stop().await;
    }

    #[tokio::test]
    async fn test_foreign_key_cannot_take_over_pending_id() {
        let master = TestMaster::start(|c| c.auth.auto_accept = "off".into()).await;
        let _ = master.connect("web01", minion_key()).await;
        let stored = master.container.keys.lookup(&id("web01")).unwrap().unwrap();

        let result = master.connect("web01", attacker_key()).await;
        assert!(matches!(result, Err(MinionError::NotAccepted(AuthStatus::Denied))));
        assert_eq!(master.container.keys.lookup(&id("web01")).unwrap().unwrap(), stored);

        master.stop().await;
    }

    // =========================================================================
    // RETURN INJECTION
    // =========================================================================

    #[tokio::test]
    async fn test_frame_from_other_session_does_not_open() {
        let master = TestMaster::start(|_| {}).await;
        let mut web01 = master.connect_ready("web01", minion_key()).await;
        let web02 = master.connect_ready("web02", minion_key()).await;

        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Glob("web*".into()), "test.ping"))
            .await
            .unwrap();
        let payload = web01.next_job().await.unwrap().unwrap();

        // web02 replays web01's return under its own session.
        let frame = SecureChannel::seal_json(web01.channel(), Direction::MinionToMaster, &forged("pong")).unwrap();
        let err = master
            .container
            .job_bus
            .submit_return(web02.session_id(), &handle.jid, &frame)
            .await
            .unwrap_err();
        assert_eq!(err, JobBusError::Channel(ChannelError::Decrypt));

        let summary = master.container.job_bus.summary(&handle.jid).unwrap();
        assert!(summary.returns.is_empty());

        // The genuine return still goes through afterwards.
        web01.send_frame(&payload.jid, frame).await.unwrap();
        let summary = master
            .container
            .job_bus
            .collect(&handle.jid, std::time::Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(summary.returns[&id("web01")].minion_id, id("web01"));
        assert_eq!(summary.missing, vec![id("web02")]);

        master.stop().await;
    }

    #[tokio::test]
    async fn test_untargeted_minion_cannot_return() {
        let master = TestMaster::start(|_| {}).await;
        let _web01 = master.connect_ready("web01", minion_key()).await;
        let mut web02 = master.connect_ready("web02", minion_key()).await;

        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.ping"))
            .await
            .unwrap();

        let frame = SecureChannel::seal_json(web02.channel(), Direction::MinionToMaster, &forged("pong")).unwrap();
        let err = master
            .container
            .job_bus
            .submit_return(web02.session_id(), &handle.jid, &frame)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JobBusError::UnauthorizedReturn {
                jid: handle.jid.clone(),
                minion_id: id("web02"),
            }
        );
        assert!(master.container.job_bus.summary(&handle.jid).unwrap().returns.is_empty());

        // Over the wire the attempt is dropped and web02 keeps its session.
        web02.send_return(&handle.jid, &forged("pong")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(master.container.job_bus.summary(&handle.jid).unwrap().returns.is_empty());
        assert_eq!(
            master.container.sessions.lookup(&id("web02")).unwrap().session_id(),
            web02.session_id()
        );

        master.stop().await;
    }

    #[tokio::test]
    async fn test_tampered_return_is_refused() {
        let master = TestMaster::start(|_| {}).await;
        let mut conn = master.connect_ready("web01", minion_key()).await;

        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.ping"))
            .await
            .unwrap();
        conn.next_job().await.unwrap().unwrap();

        let mut frame = SecureChannel::seal_json(conn.channel(), Direction::MinionToMaster, &forged("pong")).unwrap();
        frame.ciphertext[0] ^= 0x01;
        let err = master
            .container
            .job_bus
            .submit_return(conn.session_id(), &handle.jid, &frame)
            .await
            .unwrap_err();
        assert_eq!(err, JobBusError::Channel(ChannelError::Decrypt));

        // A bumped sequence on a genuine frame breaks the authenticated data.
        let mut frame = SecureChannel::seal_json(conn.channel(), Direction::MinionToMaster, &forged("pong")).unwrap();
        frame.seq += 10;
        let err = master
            .container
            .job_bus
            .submit_return(conn.session_id(), &handle.jid, &frame)
            .await
            .unwrap_err();
        assert_eq!(err, JobBusError::Channel(ChannelError::Decrypt));

        assert!(master.container.job_bus.summary(&handle.jid).unwrap().returns.is_empty());

        master.stop().await;
    }
}
