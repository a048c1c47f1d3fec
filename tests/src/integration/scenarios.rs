//! # Acceptance Scenarios
//!
//! The master over real TCP, driven by minion clients.
//!
//! | Scenario | Expectation |
//! |----------|-------------|
//! | Accepted minion runs a job | return lands under `job_cache/<jid>/<minion>/return` |
//! | Traversal ID | connection closed, nothing created |
//! | Duplicate minion ID | only the newest session is live |
//! | Replayed return | refused, stored return unchanged |

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use fm_01_key_store::KeyAdminApi;
    use fm_03_secure_channel::{Direction, SecureChannel};
    use fm_04_job_bus::{JobBusError, JobCache, JobRequest};
    use master_runtime::MinionError;
    use shared_types::{JobResult, KeyState, TargetSpec};

    fn ok(output: &str) -> JobResult {
        JobResult {
            success: true,
            output: serde_json::json!(output),
        }
    }

    // =========================================================================
    // JOB ROUND TRIP
    // =========================================================================

    #[tokio::test]
    async fn test_accepted_minion_returns_to_job_cache() {
        let master = TestMaster::start(|_| {}).await;
        let mut conn = master.connect_ready("web01", minion_key()).await;

        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.ping").with_jid(jid("j1")))
            .await
            .unwrap();
        assert_eq!(handle.jid, jid("j1"));
        assert_eq!(handle.recipients, vec![id("web01")]);

        let payload = conn.next_job().await.unwrap().unwrap();
        assert_eq!(payload.jid, jid("j1"));
        assert_eq!(payload.fun, "test.ping");
        conn.send_return(&payload.jid, &ok("pong")).await.unwrap();

        let summary = master.container.job_bus.collect(&jid("j1"), WAIT).await.unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.returns[&id("web01")].minion_id, id("web01"));

        let stored = master.base().join("job_cache").join("j1").join("web01").join("return");
        assert!(stored.is_file());
        let body = std::fs::read_to_string(stored).unwrap();
        assert!(body.contains("pong"));

        let record = master.container.key_admin().list_by_state(KeyState::Accepted).unwrap();
        assert_eq!(record.len(), 1);

        master.stop().await;
    }

    // =========================================================================
    // HOSTILE IDENTITY
    // =========================================================================

    #[tokio::test]
    async fn test_traversal_id_is_closed_without_side_effects() {
        let master = TestMaster::start(|_| {}).await;

        let result = master.connect("../../etc", minion_key()).await;
        assert!(matches!(result, Err(MinionError::Closed)));

        assert!(master.container.key_admin().list_all().unwrap().is_empty());
        assert!(master.container.sessions.is_empty());
        assert!(!master.base().join("etc").exists());

        let minions_dir = master.base().join("minions");
        let entries: Vec<_> = std::fs::read_dir(&minions_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| *name != ".lock")
            .collect();
        assert!(entries.is_empty(), "unexpected entries: {entries:?}");

        master.stop().await;
    }

    // =========================================================================
    // SESSION REPLACEMENT
    // =========================================================================

    #[tokio::test]
    async fn test_duplicate_id_keeps_only_newest_session() {
        let master = TestMaster::start(|_| {}).await;

        let mut first = master.connect_ready("web01", minion_key()).await;
        let old_session = first.session_id();
        let second = master.connect_ready("web01", minion_key()).await;
        assert_ne!(second.session_id(), old_session);

        assert_eq!(master.container.sessions.len(), 1);
        assert_eq!(
            master.container.sessions.lookup(&id("web01")).unwrap().session_id(),
            second.session_id()
        );

        // The replaced connection is closed by the master.
        let next = tokio::time::timeout(WAIT, first.next_job()).await.unwrap();
        assert!(matches!(next, Ok(None) | Err(_)));

        // A frame sealed under the old session is refused.
        let frame = SecureChannel::seal_json(first.channel(), Direction::MinionToMaster, &ok("late")).unwrap();
        let err = master
            .container
            .job_bus
            .submit_return(old_session, &jid("j1"), &frame)
            .await
            .unwrap_err();
        assert_eq!(err, JobBusError::SessionNotFound(old_session));

        master.stop().await;
    }

    // =========================================================================
    // REPLAY
    // =========================================================================

    #[tokio::test]
    async fn test_replayed_return_is_refused() {
        let master = TestMaster::start(|_| {}).await;
        let mut conn = master.connect_ready("web01", minion_key()).await;

        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.ping"))
            .await
            .unwrap();
        let payload = conn.next_job().await.unwrap().unwrap();
        let frame = conn.send_return(&payload.jid, &ok("pong")).await.unwrap();
        master.container.job_bus.collect(&handle.jid, WAIT).await.unwrap();

        let err = master
            .container
            .job_bus
            .submit_return(conn.session_id(), &handle.jid, &frame)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JobBusError::ReplayDetected {
                seq: 1,
                last_accepted: 1
            }
        );

        let stored = master.container.job_bus.cache().get_jid(&handle.jid).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[&id("web01")].output, serde_json::json!("pong"));

        master.stop().await;
    }
}
