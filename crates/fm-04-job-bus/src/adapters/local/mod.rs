//! # Local Job Cache
//!
//! ```text
//! <base>/
//! ├── job_cache/
//! │   └── <jid>/
//! │       ├── .load.json           job as published + recipients
//! │       └── <MinionId>/return    one JSON return per minion
//! ├── job_cache_archive/           cleaned jobs and events, when archiving
//! └── events/events.jsonl          event archive, one JSON line per event
//! ```
//!
//! Documents are written to a temp file and renamed into place. A return is
//! staged as `<jid>/.<MinionId>.return.tmp` and only then moved under its
//! minion directory, so a failed write never leaves a claimed slot behind.
//! Returns for the same minion are serialized on a stripe mutex. A caller's
//! JID is reserved with `create_dir`, so of two publishers exactly one wins.

use crate::domain::errors::JobCacheError;
use crate::domain::jid::JidGenerator;
use crate::domain::job::{JobLoad, RecordedEvent};
use crate::ports::outbound::JobCache;
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use shared_types::{log_preview, Job, JobId, JobReturn, MinionId, TimeSource};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Live jobs.
pub const JOB_CACHE_DIR: &str = "job_cache";
/// Cleaned jobs and events when archiving is enabled.
pub const ARCHIVE_DIR: &str = "job_cache_archive";
/// Event archive directory.
pub const EVENTS_DIR: &str = "events";
/// Event archive file.
pub const EVENTS_FILE: &str = "events.jsonl";
/// Job load document inside a JID directory.
pub const LOAD_FILE: &str = ".load.json";
/// Return document inside a minion directory.
pub const RETURN_FILE: &str = "return";

/// Attempts at finding an unused generated JID.
const MAX_JID_ATTEMPTS: usize = 16;

/// Number of return-write stripes.
const RETURN_STRIPES: usize = 16;

/// Filesystem `JobCache` rooted at the master's base directory.
pub struct LocalJobCache {
    jobs_dir: PathBuf,
    archive_dir: PathBuf,
    events_path: PathBuf,
    jids: JidGenerator,
    events_lock: Mutex<()>,
    return_stripes: Vec<Mutex<()>>,
    time_source: Arc<dyn TimeSource>,
}

impl LocalJobCache {
    /// Open (creating if needed) the cache under `base`.
    ///
    /// # Errors
    ///
    /// `Io` if the directories cannot be created.
    pub fn open(base: &Path, time_source: Arc<dyn TimeSource>) -> Result<Self, JobCacheError> {
        let jobs_dir = base.join(JOB_CACHE_DIR);
        let events_dir = base.join(EVENTS_DIR);
        fs::create_dir_all(&jobs_dir)?;
        fs::create_dir_all(&events_dir)?;

        debug!(dir = %jobs_dir.display(), "[fm-04] Job cache opened");
        Ok(Self {
            jobs_dir,
            archive_dir: base.join(ARCHIVE_DIR),
            events_path: events_dir.join(EVENTS_FILE),
            jids: JidGenerator::new(),
            events_lock: Mutex::new(()),
            return_stripes: (0..RETURN_STRIPES).map(|_| Mutex::new(())).collect(),
            time_source,
        })
    }

    /// The `job_cache` directory.
    #[must_use]
    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    fn jid_dir(&self, jid: &JobId) -> PathBuf {
        jid.path_under(&self.jobs_dir)
    }

    /// Where a return is written before it is moved into place.
    fn staged_return(jid_dir: &Path, minion_id: &MinionId) -> PathBuf {
        jid_dir.join(format!(".{minion_id}.{RETURN_FILE}.tmp"))
    }

    fn return_stripe(&self, minion_id: &MinionId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        minion_id.hash(&mut hasher);
        let index = (hasher.finish() % self.return_stripes.len() as u64) as usize;
        self.return_stripes[index].lock()
    }

    /// Refuse to write through a JID directory that resolves elsewhere.
    fn ensure_contained(&self, dir: &Path, jid: &JobId) -> Result<(), JobCacheError> {
        let root = self.jobs_dir.canonicalize()?;
        let resolved = dir.canonicalize()?;
        if resolved.parent() != Some(root.as_path()) {
            warn!(jid = %jid, "[fm-04] Job directory resolves outside the cache");
            return Err(JobCacheError::Io(format!(
                "directory for job {jid} escapes the job cache"
            )));
        }
        Ok(())
    }

    /// Every valid JID directory, sorted.
    fn list_jids(&self) -> Result<Vec<JobId>, JobCacheError> {
        let mut jids: Vec<JobId> = list_dirs(&self.jobs_dir)?
            .into_iter()
            .filter_map(|name| match JobId::parse(&name) {
                Ok(jid) => Some(jid),
                Err(e) => {
                    warn!(entry = %log_preview(&name), error = %e, "[fm-04] Skipping invalid job directory");
                    None
                }
            })
            .collect();
        jids.sort();
        Ok(jids)
    }

    fn read_events(path: &Path) -> Result<Vec<RecordedEvent>, JobCacheError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut events = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(line = n + 1, error = %e, "[fm-04] Skipping unreadable event"),
            }
        }
        Ok(events)
    }

    fn write_events(path: &Path, events: &[RecordedEvent], append: bool) -> Result<(), JobCacheError> {
        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, event).map_err(|e| JobCacheError::Io(e.to_string()))?;
            buf.push(b'\n');
        }
        if append {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(&buf)?;
            file.sync_data()?;
            Ok(())
        } else {
            write_atomic(path, &buf).map_err(Into::into)
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    write_synced(&temp_path, bytes)?;
    fs::rename(&temp_path, path)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, JobCacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| JobCacheError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

fn list_dirs(dir: &Path) -> Result<Vec<String>, JobCacheError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(_) => warn!("[fm-04] Skipping non-UTF-8 entry in job cache"),
        }
    }
    Ok(names)
}

impl JobCache for LocalJobCache {
    fn prep_jid(&self, passed: Option<JobId>) -> Result<JobId, JobCacheError> {
        if let Some(jid) = passed {
            return match fs::create_dir(self.jid_dir(&jid)) {
                Ok(()) => Ok(jid),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Err(JobCacheError::JidTaken(jid))
                }
                Err(e) => Err(e.into()),
            };
        }
        for _ in 0..MAX_JID_ATTEMPTS {
            let jid = self.jids.next()?;
            match fs::create_dir(self.jid_dir(&jid)) {
                Ok(()) => return Ok(jid),
                // Another master process sharing the cache took it.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(JobCacheError::JidExhausted)
    }

    fn save_load(&self, job: &Job, minions: &[MinionId]) -> Result<(), JobCacheError> {
        let dir = self.jid_dir(&job.jid);
        fs::create_dir_all(&dir)?;
        self.ensure_contained(&dir, &job.jid)?;

        let load = JobLoad {
            job: job.clone(),
            minions: minions.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&load).map_err(|e| JobCacheError::Io(e.to_string()))?;
        write_atomic(&dir.join(LOAD_FILE), &bytes)?;
        Ok(())
    }

    fn get_load(&self, jid: &JobId) -> Result<Option<JobLoad>, JobCacheError> {
        read_json(&self.jid_dir(jid).join(LOAD_FILE))
    }

    fn save_return(&self, ret: &JobReturn) -> Result<(), JobCacheError> {
        let jid_dir = self.jid_dir(&ret.jid);
        fs::create_dir_all(&jid_dir)?;
        self.ensure_contained(&jid_dir, &ret.jid)?;

        let minion_dir = ret.minion_id.path_under(&jid_dir);
        let return_path = minion_dir.join(RETURN_FILE);
        let staged = Self::staged_return(&jid_dir, &ret.minion_id);
        let bytes = serde_json::to_vec_pretty(ret).map_err(|e| JobCacheError::Io(e.to_string()))?;

        let _guard = self.return_stripe(&ret.minion_id);
        if return_path.exists() {
            return Err(JobCacheError::DuplicateReturn {
                jid: ret.jid.clone(),
                minion_id: ret.minion_id.clone(),
            });
        }

        if let Err(e) = write_synced(&staged, &bytes) {
            let _ = fs::remove_file(&staged);
            return Err(e.into());
        }
        // An empty minion directory is only left by a crash mid-move.
        match fs::create_dir(&minion_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                let _ = fs::remove_file(&staged);
                return Err(e.into());
            }
        }
        if let Err(e) = fs::rename(&staged, &return_path) {
            let _ = fs::remove_file(&staged);
            let _ = fs::remove_dir(&minion_dir);
            return Err(e.into());
        }
        Ok(())
    }

    fn get_jid(&self, jid: &JobId) -> Result<BTreeMap<MinionId, JobReturn>, JobCacheError> {
        let jid_dir = self.jid_dir(jid);
        let mut returns = BTreeMap::new();

        for name in list_dirs(&jid_dir)? {
            let minion_id = match MinionId::parse(&name) {
                Ok(id) => id,
                Err(e) => {
                    warn!(jid = %jid, entry = %log_preview(&name), error = %e, "[fm-04] Skipping invalid return directory");
                    continue;
                }
            };
            match read_json::<JobReturn>(&minion_id.path_under(&jid_dir).join(RETURN_FILE)) {
                Ok(Some(ret)) if ret.minion_id == minion_id && &ret.jid == jid => {
                    returns.insert(minion_id, ret);
                }
                Ok(Some(_)) => {
                    warn!(jid = %jid, minion = %minion_id, "[fm-04] Return document does not match its location");
                }
                Ok(None) => {}
                Err(e) => warn!(jid = %jid, minion = %minion_id, error = %e, "[fm-04] Skipping unreadable return"),
            }
        }
        Ok(returns)
    }

    fn get_jids(&self) -> Result<BTreeMap<JobId, JobLoad>, JobCacheError> {
        let mut loads = BTreeMap::new();
        for jid in self.list_jids()? {
            match self.get_load(&jid) {
                Ok(Some(load)) => {
                    loads.insert(jid, load);
                }
                Ok(None) => {}
                Err(e) => warn!(jid = %jid, error = %e, "[fm-04] Skipping unreadable load"),
            }
        }
        Ok(loads)
    }

    fn get_fun(&self, fun: &str) -> Result<BTreeMap<MinionId, JobReturn>, JobCacheError> {
        let mut latest = BTreeMap::new();
        for jid in self.list_jids()? {
            for (minion_id, ret) in self.get_jid(&jid)? {
                if ret.fun == fun {
                    latest.insert(minion_id, ret);
                }
            }
        }
        Ok(latest)
    }

    fn get_minions(&self) -> Result<Vec<MinionId>, JobCacheError> {
        let mut minions = Vec::new();
        for jid in self.list_jids()? {
            minions.extend(self.get_jid(&jid)?.into_keys());
        }
        minions.sort();
        minions.dedup();
        Ok(minions)
    }

    fn event_return(&self, events: &[RecordedEvent]) -> Result<(), JobCacheError> {
        if events.is_empty() {
            return Ok(());
        }
        let _guard = self.events_lock.lock();
        Self::write_events(&self.events_path, events, true)
    }

    fn get_events(&self) -> Result<Vec<RecordedEvent>, JobCacheError> {
        let _guard = self.events_lock.lock();
        Self::read_events(&self.events_path)
    }

    fn clean_old_jobs(&self, keep_jobs_hours: u64, archive: bool) -> Result<usize, JobCacheError> {
        if keep_jobs_hours == 0 {
            return Ok(0);
        }
        let now = self.time_source.now();
        let max_age = keep_jobs_hours.saturating_mul(3600);

        if archive {
            fs::create_dir_all(&self.archive_dir)?;
        }

        let mut removed = 0;
        for jid in self.list_jids()? {
            let load = match self.get_load(&jid) {
                Ok(Some(load)) => load,
                Ok(None) => {
                    debug!(jid = %jid, "[fm-04] Job without load left in place");
                    continue;
                }
                Err(e) => {
                    warn!(jid = %jid, error = %e, "[fm-04] Unreadable load left in place");
                    continue;
                }
            };
            if now.saturating_elapsed_since(load.job.issued_at) <= max_age {
                continue;
            }

            let dir = self.jid_dir(&jid);
            if archive {
                let target = jid.path_under(&self.archive_dir);
                if target.exists() {
                    fs::remove_dir_all(&target)?;
                }
                fs::rename(&dir, &target)?;
            } else {
                fs::remove_dir_all(&dir)?;
            }
            removed += 1;
        }

        let _guard = self.events_lock.lock();
        let (old, kept): (Vec<_>, Vec<_>) = Self::read_events(&self.events_path)?
            .into_iter()
            .partition(|e| now.saturating_elapsed_since(e.recorded_at) > max_age);
        if !old.is_empty() {
            if archive {
                Self::write_events(&self.archive_dir.join(EVENTS_FILE), &old, true)?;
            }
            Self::write_events(&self.events_path, &kept, false)?;
        }

        if removed > 0 {
            info!(removed, archive, "[fm-04] Old jobs cleaned");
        }
        Ok(removed)
    }
}
