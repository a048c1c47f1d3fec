//! # Multi-Minion Flows
//!
//! Targeting across several connected minions, the job cache queries that
//! follow, and the operator's key lifecycle as seen by a minion.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use fm_01_key_store::KeyAdminApi;
    use fm_04_job_bus::{JobCache, JobRequest, FIND_JOB_FUN};
    use master_runtime::MinionError;
    use shared_types::{AuthStatus, KeyState, MinionId, TargetSpec};
    use std::time::Duration;

    fn sorted(mut ids: Vec<MinionId>) -> Vec<MinionId> {
        ids.sort();
        ids
    }

    async fn fleet() -> TestMaster {
        let master = TestMaster::start(|_| {}).await;
        for name in ["web01", "web02", "db01"] {
            master.spawn_minion(name).await;
        }
        master
    }

    // =========================================================================
    // TARGETING
    // =========================================================================

    #[tokio::test]
    async fn test_glob_target_reaches_matching_minions() {
        let master = fleet().await;

        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Glob("web*".into()), "test.ping"))
            .await
            .unwrap();
        assert_eq!(sorted(handle.recipients.clone()), vec![id("web01"), id("web02")]);
        assert!(handle.undelivered.is_empty());

        let summary = master.container.job_bus.collect(&handle.jid, WAIT).await.unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.returns.len(), 2);
        for (minion, ret) in &summary.returns {
            assert_eq!(ret.minion_id, *minion);
            assert_eq!(ret.output["minion"], serde_json::json!(minion.as_str()));
            assert_eq!(ret.output["fun"], serde_json::json!("test.ping"));
        }

        master.stop().await;
    }

    #[tokio::test]
    async fn test_list_target_skips_unknown_minions() {
        let master = fleet().await;

        let handle = master
            .container
            .job_bus
            .publish(
                JobRequest::new(
                    TargetSpec::List(vec!["web01".into(), "db01".into(), "ghost".into()]),
                    "cmd.run",
                )
                .with_args(vec![serde_json::json!("uptime")]),
            )
            .await
            .unwrap();
        assert_eq!(sorted(handle.recipients.clone()), vec![id("db01"), id("web01")]);

        let summary = master.container.job_bus.collect(&handle.jid, WAIT).await.unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.returns[&id("db01")].output["arg"], serde_json::json!(["uptime"]));

        master.stop().await;
    }

    #[tokio::test]
    async fn test_regex_target_matches_whole_id() {
        let master = fleet().await;

        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Regex(r"db\d+".into()), "test.ping"))
            .await
            .unwrap();
        assert_eq!(handle.recipients, vec![id("db01")]);

        // Anchored: "eb0" appears inside "web01" but does not match it.
        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Regex("eb0".into()), "test.ping"))
            .await
            .unwrap();
        assert!(handle.recipients.is_empty());

        master.stop().await;
    }

    #[tokio::test]
    async fn test_job_with_no_recipients_completes_immediately() {
        let master = fleet().await;

        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Exact("nobody".into()), "test.ping"))
            .await
            .unwrap();
        assert!(handle.recipients.is_empty());

        let summary = master
            .container
            .job_bus
            .collect(&handle.jid, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(summary.is_complete());
        assert!(summary.returns.is_empty());

        master.stop().await;
    }

    // =========================================================================
    // JOB CACHE QUERIES
    // =========================================================================

    #[tokio::test]
    async fn test_cache_queries_after_jobs() {
        let master = fleet().await;
        let bus = &master.container.job_bus;

        for (jid_str, fun) in [("a1", "test.ping"), ("a2", FIND_JOB_FUN), ("a3", "grains.items")] {
            let handle = bus
                .publish(JobRequest::new(TargetSpec::Glob("*".into()), fun).with_jid(jid(jid_str)))
                .await
                .unwrap();
            assert!(bus.collect(&handle.jid, WAIT).await.unwrap().is_complete());
        }

        let cache = bus.cache();
        assert_eq!(cache.get_jid(&jid("a1")).unwrap().len(), 3);
        assert_eq!(cache.get_jids().unwrap().len(), 3);

        let load = cache.get_load(&jid("a3")).unwrap().unwrap();
        assert_eq!(load.job.fun, "grains.items");
        assert_eq!(sorted(load.minions), vec![id("db01"), id("web01"), id("web02")]);

        let recent: Vec<_> = cache.get_jids_filter(2, true).unwrap().into_keys().collect();
        assert_eq!(recent, vec![jid("a1"), jid("a3")]);
        let recent: Vec<_> = cache.get_jids_filter(2, false).unwrap().into_keys().collect();
        assert_eq!(recent, vec![jid("a2"), jid("a3")]);

        let pings = cache.get_fun("test.ping").unwrap();
        assert_eq!(pings.len(), 3);
        assert!(pings.values().all(|ret| ret.jid == jid("a1")));

        assert_eq!(
            cache.get_minions().unwrap(),
            vec![id("db01"), id("web01"), id("web02")]
        );

        master.stop().await;
    }

    #[tokio::test]
    async fn test_events_reach_archive() {
        let master = fleet().await;
        let handle = master
            .container
            .job_bus
            .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.ping"))
            .await
            .unwrap();
        master.container.job_bus.collect(&handle.jid, WAIT).await.unwrap();

        let cache = master.container.job_bus.cache();
        let jid_str = handle.jid.as_str().to_string();
        tokio::time::timeout(WAIT, async {
            loop {
                let events = cache.get_events().unwrap_or_default();
                if events.iter().any(|e| e.tag.contains(&jid_str)) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        master.stop().await;
    }

    // =========================================================================
    // KEY LIFECYCLE
    // =========================================================================

    #[tokio::test]
    async fn test_operator_accepts_pending_minion() {
        let master = TestMaster::start(|c| c.auth.auto_accept = "off".into()).await;
        let admin = master.container.key_admin();

        let result = master.connect("web01", minion_key()).await;
        assert!(matches!(result, Err(MinionError::NotAccepted(AuthStatus::Pending))));
        assert_eq!(admin.list_pending().unwrap().len(), 1);
        assert!(master.container.sessions.is_empty());

        let record = admin.accept(&id("web01")).unwrap();
        assert_eq!(record.state, KeyState::Accepted);
        assert!(record.last_accepted.is_some());

        master.connect_ready("web01", minion_key()).await;
        assert_eq!(master.container.sessions.len(), 1);

        master.stop().await;
    }

    #[tokio::test]
    async fn test_rejected_then_denied_minion() {
        let master = TestMaster::start(|c| c.auth.auto_accept = "off".into()).await;
        let admin = master.container.key_admin();
        let _ = master.connect("web01", minion_key()).await;

        admin.reject(&id("web01")).unwrap();
        let result = master.connect("web01", minion_key()).await;
        assert!(matches!(result, Err(MinionError::NotAccepted(AuthStatus::Rejected))));

        admin.deny(&id("web01")).unwrap();
        let result = master.connect("web01", minion_key()).await;
        assert!(matches!(result, Err(MinionError::NotAccepted(AuthStatus::Denied))));

        assert_eq!(admin.list_by_state(KeyState::Denied).unwrap().len(), 1);
        assert!(master.container.sessions.is_empty());

        master.stop().await;
    }

    #[tokio::test]
    async fn test_fingerprint_matches_presented_key() {
        let master = TestMaster::start(|_| {}).await;
        master.connect_ready("web01", minion_key()).await;

        let expected = minion_key().public_key().fingerprint().unwrap();
        assert_eq!(master.container.key_admin().fingerprint(&id("web01")).unwrap(), expected);

        master.stop().await;
    }

    #[tokio::test]
    async fn test_pending_hold_over_tcp() {
        let master = TestMaster::start(|c| {
            c.auth.auto_accept = "off".into();
            c.auth.pending_hold = true;
            c.auth.recheck_interval_secs = 1;
        })
        .await;
        let container = std::sync::Arc::clone(&master.container);

        let stream = tokio::net::TcpStream::connect(master.addr).await.unwrap();
        let client = master_runtime::MinionClient::new("web01", minion_key()).wait_while_pending(true);
        let connecting = tokio::spawn(async move { client.connect(stream).await });

        tokio::time::timeout(WAIT, async {
            while container.key_admin().list_pending().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        container.key_admin().accept(&id("web01")).unwrap();

        let conn = tokio::time::timeout(WAIT, connecting).await.unwrap().unwrap().unwrap();
        master.wait_for_session(conn.minion_id(), conn.session_id()).await;

        master.stop().await;
    }
}
