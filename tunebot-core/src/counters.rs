//! Per-command usage counters, persisted as JSON so counts survive
//! restarts.
//!
//! Increments are serialized through one async mutex covering both the
//! in-memory map and the file write: two near-simultaneous invocations of
//! the same trigger always observe distinct, consecutive counts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Error;
use tunebot_common::models::command::normalize_trigger;

pub struct CounterStore {
    path: PathBuf,
    counts: Mutex<HashMap<String, u64>>,
}

impl CounterStore {
    /// Opens the store, loading any existing counts file. A missing or
    /// unreadable file starts the store empty rather than failing, the
    /// counts are best-effort telemetry.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let counts = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, u64>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Could not parse counts file {:?}: {e}", path);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!("Loaded {} command counters from {:?}", counts.len(), path);
        Self {
            path,
            counts: Mutex::new(counts),
        }
    }

    /// Increments the counter for `trigger` and returns the new count.
    pub async fn increment(&self, trigger: &str) -> Result<u64, Error> {
        let key = normalize_trigger(trigger);
        let mut counts = self.counts.lock().await;
        let entry = counts.entry(key).or_insert(0);
        *entry += 1;
        let new_count = *entry;
        self.persist(&counts).await?;
        Ok(new_count)
    }

    /// Current count, 0 for a trigger that was never used.
    pub async fn get(&self, trigger: &str) -> u64 {
        let key = normalize_trigger(trigger);
        self.counts.lock().await.get(&key).copied().unwrap_or(0)
    }

    /// Whether any count has been recorded for `trigger`. Used to tell a
    /// cross-command count reference apart from an unknown variable name.
    pub async fn contains(&self, trigger: &str) -> bool {
        let key = normalize_trigger(trigger);
        self.counts.lock().await.contains_key(&key)
    }

    /// Resets a counter back to zero, removing it from the store.
    pub async fn reset(&self, trigger: &str) -> Result<(), Error> {
        let key = normalize_trigger(trigger);
        let mut counts = self.counts.lock().await;
        counts.remove(&key);
        self.persist(&counts).await
    }

    async fn persist(&self, counts: &HashMap<String, u64>) -> Result<(), Error> {
        let raw = serde_json::to_string_pretty(counts)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}
