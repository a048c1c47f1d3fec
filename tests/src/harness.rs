//! # Test Harness
//!
//! A master on an ephemeral localhost port, backed by a temp directory, and
//! helpers to connect minions to it.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use fm_05_session_registry::Session;
use master_runtime::{
    JobExecutor, MasterConfig, MasterContainer, MasterRuntime, MinionClient, MinionConnection,
    MinionError,
};
use shared_crypto::RsaKeyPair;
use shared_types::{JobId, JobPayload, JobResult, MinionId, SessionId};
use tempfile::TempDir;
use tokio::net::TcpStream;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

/// Test keys are small so the suite stays fast.
pub const TEST_KEY_BITS: usize = 1024;

pub fn minion_key() -> Arc<RsaKeyPair> {
    static KEY: OnceLock<Arc<RsaKeyPair>> = OnceLock::new();
    Arc::clone(KEY.get_or_init(|| Arc::new(RsaKeyPair::generate(TEST_KEY_BITS).unwrap())))
}

pub fn attacker_key() -> Arc<RsaKeyPair> {
    static KEY: OnceLock<Arc<RsaKeyPair>> = OnceLock::new();
    Arc::clone(KEY.get_or_init(|| Arc::new(RsaKeyPair::generate(TEST_KEY_BITS).unwrap())))
}

pub fn id(raw: &str) -> MinionId {
    MinionId::parse(raw).unwrap()
}

pub fn jid(raw: &str) -> JobId {
    JobId::parse(raw).unwrap()
}

/// Executor that reports who ran what.
pub struct Echo;

#[async_trait]
impl JobExecutor for Echo {
    async fn execute(&self, minion_id: &MinionId, payload: JobPayload) -> JobResult {
        JobResult {
            success: true,
            output: serde_json::json!({
                "minion": minion_id.as_str(),
                "fun": payload.fun,
                "arg": payload.arg,
            }),
        }
    }
}

pub struct TestMaster {
    dir: TempDir,
    runtime: MasterRuntime,
    pub container: Arc<MasterContainer>,
    pub addr: SocketAddr,
}

impl TestMaster {
    /// Start a master with auto-accept on and a test-sized key floor,
    /// then apply `configure`.
    pub async fn start(configure: impl FnOnce(&mut MasterConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MasterConfig::default();
        config.network.listen_addr = "127.0.0.1:0".into();
        config.storage.base_dir = dir.path().to_path_buf();
        config.auth.min_rsa_bits = TEST_KEY_BITS;
        config.auth.auto_accept = "all".into();
        configure(&mut config);

        let mut runtime = MasterRuntime::new(MasterContainer::open(config).unwrap());
        let addr = runtime.start().await.unwrap();
        Self {
            dir,
            container: runtime.container(),
            runtime,
            addr,
        }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    /// Open a TCP connection and run the handshake as `raw_id`.
    pub async fn connect(
        &self,
        raw_id: &str,
        key: Arc<RsaKeyPair>,
    ) -> Result<MinionConnection<TcpStream>, MinionError> {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        tokio::time::timeout(WAIT, MinionClient::new(raw_id, key).connect(stream))
            .await
            .unwrap()
    }

    /// Wait until `session_id` is the registered session of `minion`.
    pub async fn wait_for_session(&self, minion: &MinionId, session_id: SessionId) -> Arc<Session> {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(session) = self.container.sessions.lookup(minion) {
                    if session.session_id() == session_id {
                        return session;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    /// Connect and wait for the registry to hold the new session.
    pub async fn connect_ready(&self, raw_id: &str, key: Arc<RsaKeyPair>) -> MinionConnection<TcpStream> {
        let conn = self.connect(raw_id, key).await.unwrap();
        self.wait_for_session(conn.minion_id(), conn.session_id()).await;
        conn
    }

    /// Connect a minion that executes jobs with [`Echo`] in the background.
    pub async fn spawn_minion(&self, raw_id: &str) -> tokio::task::JoinHandle<Result<usize, MinionError>> {
        let conn = self.connect_ready(raw_id, minion_key()).await;
        tokio::spawn(async move { conn.run(&Echo).await })
    }

    pub async fn stop(self) {
        self.runtime.shutdown().await;
    }
}
