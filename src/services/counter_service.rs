//! Per-mode, per-year document counters used for archive numbering.
//!
//! [`CounterStore::increment_and_get`] is the only way a counter moves. There
//! is no reset.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MODE: &str = "LP";

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Counter {key} cannot be incremented any further")]
    CounterOverflow { key: String },

    #[error("Counter store lock is poisoned")]
    PoisonedLock,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterKey {
    pub mode: String,
    pub year: i32,
}

impl CounterKey {
    /// Blank modes fall back to [`DEFAULT_MODE`].
    pub fn new(mode: &str, year: i32) -> Self {
        let mode = mode.trim();
        Self {
            mode: if mode.is_empty() { DEFAULT_MODE } else { mode }.to_string(),
            year,
        }
    }

    /// Parses the `"{mode}/{year}"` form produced by `Display`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (mode, year) = raw.rsplit_once('/')?;
        Some(Self::new(mode, year.trim().parse().ok()?))
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mode, self.year)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CounterStore {
    counters: Arc<Mutex<HashMap<CounterKey, u64>>>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CounterKey) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.get(key).copied().unwrap_or(0)
    }

    /// The value the next increment would return.
    pub fn peek_next(&self, key: &CounterKey) -> u64 {
        self.get(key).saturating_add(1)
    }

    pub fn increment_and_get(&self, key: &CounterKey) -> Result<u64, SynthesisError> {
        let mut counters = self.counters.lock().map_err(|_| SynthesisError::PoisonedLock)?;
        let slot = counters.entry(key.clone()).or_insert(0);
        *slot = slot
            .checked_add(1)
            .ok_or_else(|| SynthesisError::CounterOverflow { key: key.to_string() })?;
        debug!("Counter {} advanced to {}", key, slot);
        Ok(*slot)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.iter().map(|(key, value)| (key.to_string(), *value)).collect()
    }

    /// Rebuilds a store from [`CounterStore::snapshot`] output. Malformed keys
    /// are skipped.
    pub fn from_snapshot(snapshot: &BTreeMap<String, u64>) -> Self {
        let counters = snapshot
            .iter()
            .filter_map(|(raw, value)| match CounterKey::parse(raw) {
                Some(key) => Some((key, *value)),
                None => {
                    warn!("Ignoring malformed counter key {:?}", raw);
                    None
                }
            })
            .collect();
        Self {
            counters: Arc::new(Mutex::new(counters)),
        }
    }

    /// Reads a snapshot file. Missing or unreadable files give empty counters.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, u64>>(&raw) {
                Ok(snapshot) => {
                    info!("Loaded {} counters from {}", snapshot.len(), path.display());
                    Self::from_snapshot(&snapshot)
                }
                Err(e) => {
                    warn!("Counters file {} is not valid JSON: {}", path.display(), e);
                    Self::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::new(),
            Err(e) => {
                warn!("Failed to read counters file {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        tokio::fs::write(path.as_ref(), json).await?;
        Ok(())
    }
}
