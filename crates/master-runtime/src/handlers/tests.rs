//! Connection and maintenance handler tests over in-memory streams.

use super::*;
use crate::container::{MasterConfig, MasterContainer};
use crate::minion::{MinionClient, MinionError};
use crate::runtime::MasterRuntime;
use crate::transport::{read_message, write_message};
use fm_01_key_store::{KeyAdminApi, KeyStoreApi};
use fm_04_job_bus::{JobBusError, JobRequest};
use shared_bus::EventFilter;
use shared_crypto::RsaKeyPair;
use shared_types::{
    AuthStatus, FixedTimeSource, JobResult, MinionId, SealedFrame, TargetSpec, WireMessage,
    MAX_FRAME_LEN,
};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(10);

fn keypair() -> Arc<RsaKeyPair> {
    static KEY: OnceLock<Arc<RsaKeyPair>> = OnceLock::new();
    Arc::clone(KEY.get_or_init(|| Arc::new(RsaKeyPair::generate(1024).unwrap())))
}

fn id(raw: &str) -> MinionId {
    MinionId::parse(raw).unwrap()
}

struct Master {
    _dir: TempDir,
    base: std::path::PathBuf,
    container: Arc<MasterContainer>,
    clock: Arc<FixedTimeSource>,
    shutdown: watch::Sender<bool>,
}

impl Master {
    fn new(configure: impl FnOnce(&mut MasterConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MasterConfig::default();
        config.storage.base_dir = dir.path().to_path_buf();
        config.auth.min_rsa_bits = 1024;
        config.auth.auto_accept = "all".into();
        configure(&mut config);

        let clock = Arc::new(FixedTimeSource::new(50_000));
        let container = MasterContainer::with_time_source(config, clock.clone()).unwrap();
        let (shutdown, _) = watch::channel(false);
        Self {
            base: dir.path().to_path_buf(),
            _dir: dir,
            container: Arc::new(container),
            clock,
            shutdown,
        }
    }

    /// Start serving one connection; returns the minion's end of it.
    fn accept(&self) -> (DuplexStream, JoinHandle<ConnectionEnd>) {
        let (minion_side, master_side) = tokio::io::duplex(64 * 1024);
        let handler = ConnectionHandler::new(Arc::clone(&self.container), self.shutdown.subscribe());
        let task = tokio::spawn(async move { handler.serve(master_side, "test").await });
        (minion_side, task)
    }

    async fn wait_for_session(&self, minion: &MinionId) {
        tokio::time::timeout(WAIT, async {
            while self.container.sessions.lookup(minion).is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}

async fn ended(task: JoinHandle<ConnectionEnd>) -> ConnectionEnd {
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap()
}

fn ok(output: &str) -> JobResult {
    JobResult {
        success: true,
        output: serde_json::json!(output),
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

#[tokio::test]
async fn test_accepted_minion_runs_job_end_to_end() {
    let master = Master::new(|_| {});
    let (stream, _task) = master.accept();
    let mut conn = MinionClient::new("web01", keypair()).connect(stream).await.unwrap();
    assert_eq!(conn.minion_id(), &id("web01"));
    master.wait_for_session(&id("web01")).await;

    let handle = master
        .container
        .job_bus
        .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.ping"))
        .await
        .unwrap();
    assert_eq!(handle.recipients, vec![id("web01")]);

    let payload = conn.next_job().await.unwrap().unwrap();
    assert_eq!(payload.jid, handle.jid);
    assert_eq!(payload.fun, "test.ping");
    conn.send_return(&payload.jid, &ok("pong")).await.unwrap();

    let summary = master.container.job_bus.collect(&handle.jid, WAIT).await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.returns[&id("web01")].output, serde_json::json!("pong"));
    assert!(master
        .base
        .join("job_cache")
        .join(handle.jid.as_str())
        .join("web01")
        .join("return")
        .is_file());
}

#[tokio::test]
async fn test_pending_key_closes_without_hold() {
    let master = Master::new(|c| c.auth.auto_accept = "off".into());
    let (stream, task) = master.accept();

    let result = MinionClient::new("web01", keypair()).connect(stream).await;
    assert!(matches!(result, Err(MinionError::NotAccepted(AuthStatus::Pending))));
    assert_eq!(ended(task).await, ConnectionEnd::Pending);

    let pending = master.container.key_admin().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].minion_id, id("web01"));
    assert!(master.container.sessions.is_empty());
}

#[tokio::test]
async fn test_pending_hold_resumes_after_operator_accept() {
    let master = Master::new(|c| {
        c.auth.auto_accept = "off".into();
        c.auth.pending_hold = true;
        c.auth.recheck_interval_secs = 1;
    });
    let (stream, _task) = master.accept();

    let client = tokio::spawn(async move {
        MinionClient::new("web01", keypair())
            .wait_while_pending(true)
            .connect(stream)
            .await
            .map(|conn| conn.session_id())
    });

    tokio::time::timeout(WAIT, async {
        while master.container.keys.lookup(&id("web01")).unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    master.container.key_admin().accept(&id("web01")).unwrap();

    let session_id = tokio::time::timeout(WAIT, client).await.unwrap().unwrap().unwrap();
    master.wait_for_session(&id("web01")).await;
    assert_eq!(
        master.container.sessions.lookup(&id("web01")).unwrap().session_id(),
        session_id
    );
}

#[tokio::test]
async fn test_pending_hold_expires_without_accepting() {
    let master = Master::new(|c| {
        c.auth.auto_accept = "off".into();
        c.auth.pending_hold = true;
        c.auth.recheck_interval_secs = 1;
        c.auth.pending_hold_timeout_secs = 1;
    });
    let (stream, task) = master.accept();

    let result = MinionClient::new("web01", keypair())
        .wait_while_pending(true)
        .connect(stream)
        .await;
    assert!(matches!(result, Err(MinionError::Closed)));
    assert_eq!(ended(task).await, ConnectionEnd::HoldExpired);

    let record = master.container.keys.lookup(&id("web01")).unwrap().unwrap();
    assert_eq!(record.state, shared_types::KeyState::Pending);
}

#[tokio::test]
async fn test_traversal_id_gets_no_response_and_no_directory() {
    let master = Master::new(|_| {});
    let (stream, task) = master.accept();

    let result = MinionClient::new("../../etc", keypair()).connect(stream).await;
    assert!(matches!(result, Err(MinionError::Closed)));
    assert_eq!(ended(task).await, ConnectionEnd::Refused("denied"));

    let entries: Vec<_> = std::fs::read_dir(master.base.join("minions"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|name| *name != ".lock")
        .collect();
    assert!(entries.is_empty(), "unexpected entries: {:?}", entries);
    assert!(!master.base.join("etc").exists());
}

#[tokio::test]
async fn test_silent_minion_times_out() {
    let master = Master::new(|c| c.auth.handshake_timeout_secs = 1);
    let (mut stream, task) = master.accept();

    let challenge = read_message(&mut stream, MAX_FRAME_LEN).await.unwrap();
    assert!(matches!(challenge, Some(WireMessage::Challenge { .. })));
    assert_eq!(ended(task).await, ConnectionEnd::HandshakeTimeout);
    assert_eq!(master.container.auth.outstanding_challenges(), 0);
}

#[tokio::test]
async fn test_return_before_auth_is_a_protocol_violation() {
    let master = Master::new(|_| {});
    let (mut stream, task) = master.accept();

    read_message(&mut stream, MAX_FRAME_LEN).await.unwrap();
    let early = WireMessage::JobReturn {
        jid: shared_types::JobId::parse("j1").unwrap(),
        frame: SealedFrame {
            seq: 1,
            ciphertext: vec![0; 32],
        },
    };
    write_message(&mut stream, &early, MAX_FRAME_LEN).await.unwrap();

    assert_eq!(
        ended(task).await,
        ConnectionEnd::ProtocolViolation("expected AUTH_REQUEST")
    );
}

// =============================================================================
// SESSION
// =============================================================================

#[tokio::test]
async fn test_second_connection_replaces_first() {
    let master = Master::new(|_| {});
    let (first_stream, first_task) = master.accept();
    let mut first = MinionClient::new("web01", keypair()).connect(first_stream).await.unwrap();
    master.wait_for_session(&id("web01")).await;
    let old_session = first.session_id();

    let (second_stream, _second_task) = master.accept();
    let second = MinionClient::new("web01", keypair()).connect(second_stream).await.unwrap();

    assert_eq!(ended(first_task).await, ConnectionEnd::Revoked);
    assert!(first.next_job().await.unwrap().is_none());

    master.wait_for_session(&id("web01")).await;
    let current = master.container.sessions.lookup(&id("web01")).unwrap();
    assert_eq!(current.session_id(), second.session_id());
    assert_eq!(master.container.sessions.len(), 1);

    let frame = SealedFrame {
        seq: 1,
        ciphertext: vec![0; 32],
    };
    let jid = shared_types::JobId::parse("j1").unwrap();
    let err = master
        .container
        .job_bus
        .submit_return(old_session, &jid, &frame)
        .await
        .unwrap_err();
    assert!(matches!(err, JobBusError::SessionNotFound(s) if s == old_session));
}

#[tokio::test]
async fn test_replayed_return_is_refused_and_connection_survives() {
    let master = Master::new(|_| {});
    let (stream, task) = master.accept();
    let mut conn = MinionClient::new("web01", keypair()).connect(stream).await.unwrap();
    master.wait_for_session(&id("web01")).await;

    let job_bus = &master.container.job_bus;
    let handle = job_bus
        .publish(JobRequest::new(TargetSpec::Glob("web*".into()), "test.ping"))
        .await
        .unwrap();
    let payload = conn.next_job().await.unwrap().unwrap();
    let frame = conn.send_return(&payload.jid, &ok("pong")).await.unwrap();
    job_bus.collect(&handle.jid, WAIT).await.unwrap();

    conn.send_frame(&payload.jid, frame.clone()).await.unwrap();
    let err = job_bus
        .submit_return(conn.session_id(), &payload.jid, &frame)
        .await
        .unwrap_err();
    assert!(matches!(err, JobBusError::ReplayDetected { seq: 1, last_accepted: 1 }));

    // Still serving: a second job round-trips on the same connection.
    let next = job_bus
        .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.echo"))
        .await
        .unwrap();
    let payload = conn.next_job().await.unwrap().unwrap();
    conn.send_return(&payload.jid, &ok("again")).await.unwrap();
    assert!(job_bus.collect(&next.jid, WAIT).await.unwrap().is_complete());
    assert!(!task.is_finished());
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let master = Master::new(|_| {});
    let (stream, task) = master.accept();
    let conn = MinionClient::new("web01", keypair()).connect(stream).await.unwrap();
    master.wait_for_session(&id("web01")).await;

    drop(conn);
    assert_eq!(ended(task).await, ConnectionEnd::Disconnected);
    assert!(master.container.sessions.is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let master = Master::new(|_| {});
    let (stream, task) = master.accept();
    let mut conn = MinionClient::new("web01", keypair()).connect(stream).await.unwrap();
    master.wait_for_session(&id("web01")).await;

    master.shutdown.send(true).unwrap();
    assert_eq!(ended(task).await, ConnectionEnd::Shutdown);
    assert!(conn.next_job().await.unwrap().is_none());
    assert!(master.container.sessions.is_empty());
}

// =============================================================================
// MAINTENANCE
// =============================================================================

#[tokio::test]
async fn test_sweep_revokes_idle_session_and_expires_jobs() {
    let master = Master::new(|c| {
        c.sessions.idle_timeout_secs = 60;
        c.jobs.job_timeout_secs = 30;
    });
    let (stream, task) = master.accept();
    let _conn = MinionClient::new("web01", keypair()).connect(stream).await.unwrap();
    master.wait_for_session(&id("web01")).await;

    let handle = master
        .container
        .job_bus
        .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.sleep"))
        .await
        .unwrap();

    let sweeper = SweepHandler::new(Arc::clone(&master.container));
    assert_eq!(sweeper.sweep_once().await, SweepReport::default());

    master.clock.advance(61);
    let report = sweeper.sweep_once().await;
    assert_eq!(report.sessions, vec![id("web01")]);
    assert_eq!(report.jobs, vec![handle.jid]);
    assert_eq!(ended(task).await, ConnectionEnd::Revoked);
}

#[tokio::test]
async fn test_event_return_handler_archives_events() {
    let master = Master::new(|_| {});
    let subscription = master.container.events.subscribe(EventFilter::all());
    let handler = EventReturnHandler::new(Arc::clone(&master.container), subscription);
    let task = tokio::spawn(handler.run());

    let handle = master
        .container
        .job_bus
        .publish(JobRequest::new(TargetSpec::Glob("nobody*".into()), "test.ping"))
        .await
        .unwrap();

    let events = master.base.join("events").join("events.jsonl");
    tokio::time::timeout(WAIT, async {
        while !std::fs::read_to_string(&events)
            .unwrap_or_default()
            .contains(handle.jid.as_str())
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    task.abort();
}

#[tokio::test]
async fn test_cache_cleaner_keeps_fresh_jobs() {
    let master = Master::new(|c| c.jobs.keep_jobs_hours = 1);
    master
        .container
        .job_bus
        .publish(JobRequest::new(TargetSpec::Exact("web01".into()), "test.ping"))
        .await
        .unwrap();

    let cleaner = CacheCleaner::new(Arc::clone(&master.container));
    assert_eq!(cleaner.clean_once().await, 0);

    master.clock.advance(2 * 3600);
    assert_eq!(cleaner.clean_once().await, 1);
}

#[tokio::test]
async fn test_runtime_handler_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MasterConfig::default();
    config.storage.base_dir = dir.path().to_path_buf();
    config.auth.min_rsa_bits = 1024;
    config.auth.auto_accept = "all".into();
    let runtime = MasterRuntime::new(MasterContainer::open(config).unwrap());

    let (minion_side, master_side) = tokio::io::duplex(64 * 1024);
    let handler = runtime.connection_handler();
    let task = tokio::spawn(async move { handler.serve(master_side, "test").await });
    let _conn = MinionClient::new("db01", keypair()).connect(minion_side).await.unwrap();

    runtime.shutdown().await;
    assert_eq!(ended(task).await, ConnectionEnd::Shutdown);
}
