//! Persistence for the usage aggregator's state.
//!
//! The whole state is one small JSON document, rewritten after every
//! ingestion. [`JsonFileStore`] is used in production; [`MemoryStore`] backs
//! tests and can be told to fail writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tank_core::models::DailyUsageRecord;
use tank_core::{Result, TankError};
use tracing::{debug, warn};

/// File name of the usage document inside the data directory.
pub const USAGE_FILE_NAME: &str = "usage.json";

// ── UsageState ────────────────────────────────────────────────────────────────

/// Everything the aggregator needs to survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageState {
    /// One record per local calendar date.
    pub records: BTreeMap<NaiveDate, DailyUsageRecord>,
    /// Level of the previous ingested reading, the baseline for the next delta.
    pub last_observed_level: Option<f64>,
    /// Timestamp of the previous ingested reading.
    pub last_reading_at: Option<DateTime<Utc>>,
    /// Wall clock of the previous ingestion, used for pump run time.
    pub last_ingest_at: Option<DateTime<Utc>>,
}

impl UsageState {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.last_observed_level.is_none()
    }
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// Load/save seam for [`UsageState`].
pub trait UsageStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<UsageState>>;

    fn save(&self, state: &UsageState) -> Result<()>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

// ── JsonFileStore ─────────────────────────────────────────────────────────────

/// Pretty-printed JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/usage.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(USAGE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a corrupt document is moved before starting over.
    pub fn corrupt_path(&self) -> PathBuf {
        self.path.with_extension("json.corrupt")
    }

    fn quarantine(&self) {
        let target = self.corrupt_path();
        match std::fs::rename(&self.path, &target) {
            Ok(()) => warn!(path = %target.display(), "moved corrupt usage store aside"),
            Err(e) => warn!(error = %e, path = %self.path.display(), "could not move corrupt usage store aside"),
        }
    }
}

impl UsageStore for JsonFileStore {
    /// A document that fails to decode is renamed to
    /// [`corrupt_path`](Self::corrupt_path) and reported as
    /// [`TankError::StorageCorrupt`].
    fn load(&self) -> Result<Option<UsageState>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(TankError::StorageRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match serde_json::from_str::<UsageState>(&content) {
            Ok(state) => {
                debug!(path = %self.path.display(), records = state.records.len(), "loaded usage state");
                Ok(Some(state))
            }
            Err(e) => {
                self.quarantine();
                Err(TankError::StorageCorrupt {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn save(&self, state: &UsageState) -> Result<()> {
        let write_err = |source: std::io::Error| TankError::StorageWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

/// In-process store. Clones share the same contents, so a test can keep a
/// handle after boxing one into an aggregator.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<Option<UsageState>>>,
    fail_writes: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: UsageState) -> Self {
        let store = Self::default();
        *store.lock() = Some(state);
        store
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last successfully saved state.
    pub fn snapshot(&self) -> Option<UsageState> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<UsageState>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UsageStore for MemoryStore {
    fn load(&self) -> Result<Option<UsageState>> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &UsageState) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TankError::StorageWrite {
                path: PathBuf::from(":memory:"),
                source: std::io::Error::other("writes disabled"),
            });
        }
        *self.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        ":memory:".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
