//! # Master Container
//!
//! Holds every subsystem instance for one master process.
//!
//! ## Initialization Order
//!
//! ```text
//! Level 0: event bus, clock
//! Level 1: key store (fm-01), session registry (fm-05), job cache
//! Level 2: auth handshake (fm-02), job bus (fm-04)
//! ```
//!
//! ## Ownership
//!
//! Per-minion state lives only in the stores created here. Everything is
//! handed out by `Arc`; there are no process globals.

use std::sync::Arc;

use fm_01_key_store::{FileKeyStorage, KeyAdminApi, KeyStoreApi, KeyStoreError, KeyStoreService};
use fm_02_auth_handshake::AuthService;
use fm_04_job_bus::{JobBus, JobCache, JobCacheError, LocalJobCache};
use fm_05_session_registry::SessionRegistry;
use shared_bus::{EventPublisher, InMemoryEventBus};
use shared_types::{SystemTimeSource, TimeSource};
use thiserror::Error;
use tracing::info;

use crate::container::config::MasterConfig;

/// Key store over the directory-per-minion backend.
pub type FileKeyStore = KeyStoreService<FileKeyStorage>;

/// Failures while opening the master's stores.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The key store could not be opened (I/O or held by another process).
    #[error("Key store: {0}")]
    KeyStore(#[from] KeyStoreError),

    /// The job cache could not be opened.
    #[error("Job cache: {0}")]
    JobCache(#[from] JobCacheError),
}

/// Central container holding all subsystem instances.
pub struct MasterContainer {
    /// Runtime configuration.
    pub config: MasterConfig,

    // =========================================================================
    // SHARED INFRASTRUCTURE
    // =========================================================================
    /// Lifecycle event fan-out.
    pub events: Arc<InMemoryEventBus>,
    /// Clock shared by every subsystem.
    pub time_source: Arc<dyn TimeSource>,

    // =========================================================================
    // STORES
    // =========================================================================
    /// Key Store (fm-01).
    pub keys: Arc<FileKeyStore>,
    /// Session Registry (fm-05).
    pub sessions: Arc<SessionRegistry>,

    // =========================================================================
    // SERVICES
    // =========================================================================
    /// Auth Handshake (fm-02).
    pub auth: Arc<AuthService>,
    /// Job Bus (fm-04).
    pub job_bus: Arc<JobBus>,
}

impl MasterContainer {
    /// Open the stores under `config.storage.base_dir` on the wall clock.
    ///
    /// # Errors
    ///
    /// Fails if either store cannot be opened.
    pub fn open(config: MasterConfig) -> Result<Self, StartupError> {
        Self::with_time_source(config, Arc::new(SystemTimeSource))
    }

    /// Like [`open`](Self::open) with an explicit clock.
    pub fn with_time_source(
        config: MasterConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, StartupError> {
        let base = config.storage.base_dir.clone();
        info!(base = %base.display(), "Initializing master subsystems");

        let events = Arc::new(InMemoryEventBus::new());
        let publisher: Arc<dyn EventPublisher> = events.clone();

        let keys = Arc::new(KeyStoreService::new(
            FileKeyStorage::open(&base)?,
            config.auto_accept_policy(),
            Arc::clone(&time_source),
        ));
        info!("  [fm-01] Key Store initialized");

        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&time_source)));
        info!("  [fm-05] Session Registry initialized");

        let auth = Arc::new(AuthService::new(
            keys.clone() as Arc<dyn KeyStoreApi>,
            Arc::clone(&sessions),
            Arc::clone(&publisher),
            config.auth_config(),
            Arc::clone(&time_source),
        ));
        info!("  [fm-02] Auth Handshake initialized");

        let cache: Arc<dyn JobCache> =
            Arc::new(LocalJobCache::open(&base, Arc::clone(&time_source))?);
        let job_bus = Arc::new(JobBus::new(
            Arc::clone(&sessions),
            cache,
            publisher,
            Arc::clone(&time_source),
            config.job_bus_config(),
        ));
        info!("  [fm-04] Job Bus initialized");

        Ok(Self {
            config,
            events,
            time_source,
            keys,
            sessions,
            auth,
            job_bus,
        })
    }

    /// Operator interface to the key store.
    #[must_use]
    pub fn key_admin(&self) -> Arc<dyn KeyAdminApi> {
        self.keys.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{FixedTimeSource, MinionId};

    fn config(base: &std::path::Path) -> MasterConfig {
        let mut config = MasterConfig::default();
        config.storage.base_dir = base.to_path_buf();
        config
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let container = MasterContainer::open(config(dir.path())).unwrap();

        assert!(dir.path().join("minions").is_dir());
        assert!(dir.path().join("job_cache").is_dir());
        assert!(container.sessions.is_empty());
        assert_eq!(container.job_bus.in_flight(), 0);
    }

    #[test]
    fn test_second_master_on_same_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _first = MasterContainer::open(config(dir.path())).unwrap();

        let mut second = config(dir.path());
        second.auth.auto_accept = "all".into();
        let result = MasterContainer::open(second);
        assert!(matches!(result, Err(StartupError::KeyStore(KeyStoreError::Lock(_)))));
    }

    #[test]
    fn test_key_admin_shares_store() {
        let dir = tempfile::tempdir().unwrap();
        let container = MasterContainer::with_time_source(
            config(dir.path()),
            Arc::new(FixedTimeSource::new(1_000)),
        )
        .unwrap();

        let id = MinionId::parse("web01").unwrap();
        assert!(container.key_admin().list_pending().unwrap().is_empty());
        assert!(container.keys.lookup(&id).unwrap().is_none());
    }
}
