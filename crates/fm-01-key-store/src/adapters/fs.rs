//! # Filesystem Key Storage
//!
//! One directory per minion under `<base>/minions`. Every write goes to a
//! temporary file that is synced and renamed into place, so readers see
//! either the old or the new content.
//!
//! A crash between writing a new state marker and removing the old one can
//! leave two markers. Reads resolve that toward the most restrictive state.

use crate::adapters::lock::{StoreLock, DEFAULT_LOCK_TIMEOUT};
use crate::domain::errors::KeyStoreError;
use crate::ports::outbound::KeyStorage;
use serde::{Deserialize, Serialize};
use shared_types::{log_preview, KeyRecord, KeyState, MinionId, PublicKeyPem, Timestamp};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Directory under the base that holds minion records.
pub const MINIONS_DIR: &str = "minions";

/// Public key file inside a minion directory.
pub const KEY_FILE: &str = "key";

/// Most restrictive first.
const READ_PRECEDENCE: [KeyState; 4] = [
    KeyState::Denied,
    KeyState::Rejected,
    KeyState::Pending,
    KeyState::Accepted,
];

/// Contents of a state marker file.
#[derive(Debug, Serialize, Deserialize)]
struct MarkerMeta {
    first_seen: Timestamp,
    #[serde(default)]
    last_accepted: Option<Timestamp>,
}

/// Directory-per-minion `KeyStorage`. Holds the store's process lock for
/// its whole lifetime.
#[derive(Debug)]
pub struct FileKeyStorage {
    minions_dir: PathBuf,
    _lock: StoreLock,
}

impl FileKeyStorage {
    /// Open (creating if needed) the store under `base`.
    ///
    /// # Errors
    ///
    /// `Lock` if another process holds the store, `Storage` on I/O failure.
    pub fn open(base: &Path) -> Result<Self, KeyStoreError> {
        Self::open_with_lock_timeout(base, DEFAULT_LOCK_TIMEOUT)
    }

    /// Like [`open`](Self::open) with an explicit lock wait.
    pub fn open_with_lock_timeout(base: &Path, timeout: Duration) -> Result<Self, KeyStoreError> {
        let minions_dir = base.join(MINIONS_DIR);
        fs::create_dir_all(&minions_dir)?;
        let lock = StoreLock::acquire(&minions_dir, timeout)
            .map_err(|e| KeyStoreError::Lock(e.to_string()))?;

        debug!(dir = %minions_dir.display(), "[fm-01] Key store opened");
        Ok(Self {
            minions_dir,
            _lock: lock,
        })
    }

    /// The `minions` directory.
    #[must_use]
    pub fn minions_dir(&self) -> &Path {
        &self.minions_dir
    }

    fn minion_dir(&self, minion_id: &MinionId) -> PathBuf {
        minion_id.path_under(&self.minions_dir)
    }

    /// Refuse to write through a directory that resolves outside the store
    /// (e.g. a planted symlink).
    fn ensure_contained(&self, dir: &Path, minion_id: &MinionId) -> Result<(), KeyStoreError> {
        let root = self.minions_dir.canonicalize()?;
        let resolved = dir.canonicalize()?;
        if resolved.parent() != Some(root.as_path()) {
            warn!(minion = %minion_id, "[fm-01] Minion directory resolves outside the store");
            return Err(KeyStoreError::Storage(format!(
                "directory for {minion_id} escapes the key store"
            )));
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl KeyStorage for FileKeyStorage {
    fn load(&self, minion_id: &MinionId) -> Result<Option<KeyRecord>, KeyStoreError> {
        let dir = self.minion_dir(minion_id);

        let pem = match fs::read_to_string(dir.join(KEY_FILE)) {
            Ok(pem) => PublicKeyPem::new(&pem),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        for state in READ_PRECEDENCE {
            let bytes = match fs::read(dir.join(state.as_str())) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let meta: MarkerMeta =
                serde_json::from_slice(&bytes).map_err(|e| KeyStoreError::Corrupt {
                    minion_id: minion_id.clone(),
                    reason: format!("{} marker: {e}", state),
                })?;
            return Ok(Some(KeyRecord {
                minion_id: minion_id.clone(),
                public_key: pem,
                state,
                first_seen: meta.first_seen,
                last_accepted: meta.last_accepted,
            }));
        }

        // Key written but marker never landed: treat as undecided.
        warn!(minion = %minion_id, "[fm-01] Key without state marker, treating as pending");
        Ok(Some(KeyRecord {
            minion_id: minion_id.clone(),
            public_key: pem,
            state: KeyState::Pending,
            first_seen: Timestamp::default(),
            last_accepted: None,
        }))
    }

    fn store(&self, record: &KeyRecord) -> Result<(), KeyStoreError> {
        let dir = self.minion_dir(&record.minion_id);
        fs::create_dir_all(&dir)?;
        self.ensure_contained(&dir, &record.minion_id)?;

        let key_path = dir.join(KEY_FILE);
        let unchanged = fs::read_to_string(&key_path)
            .map(|existing| PublicKeyPem::new(&existing) == record.public_key)
            .unwrap_or(false);
        if !unchanged {
            write_atomic(&key_path, format!("{}\n", record.public_key.as_str()).as_bytes())?;
        }

        let meta = MarkerMeta {
            first_seen: record.first_seen,
            last_accepted: record.last_accepted,
        };
        let meta = serde_json::to_vec_pretty(&meta)
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        write_atomic(&dir.join(record.state.as_str()), &meta)?;

        for other in KeyState::ALL.iter().filter(|s| **s != record.state) {
            remove_if_exists(&dir.join(other.as_str()))?;
        }
        Ok(())
    }

    fn remove(&self, minion_id: &MinionId) -> Result<bool, KeyStoreError> {
        match fs::remove_dir_all(self.minion_dir(minion_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<KeyRecord>, KeyStoreError> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.minions_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!("[fm-01] Skipping non-UTF-8 entry in key store");
                continue;
            };
            // Directory names are re-validated; anything the sanitizer
            // refuses was not written by us.
            let minion_id = match MinionId::parse(name) {
                Ok(id) => id,
                Err(e) => {
                    warn!(entry = %log_preview(name), error = %e, "[fm-01] Skipping invalid entry in key store");
                    continue;
                }
            };
            match self.load(&minion_id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(minion = %minion_id, error = %e, "[fm-01] Skipping unreadable record"),
            }
        }

        records.sort_by(|a, b| a.minion_id.cmp(&b.minion_id));
        Ok(records)
    }
}
