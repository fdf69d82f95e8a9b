//! Timed broadcast messages ("post the socials every 15 minutes, but
//! only if chat is alive").
//!
//! A timer fires when its interval has elapsed since its previous firing
//! AND enough chat lines arrived in that window, so a dead chat is never
//! spammed. This manager only decides *what* is due; the chat connection
//! layer owns the polling cadence and the actual send. Timer definitions
//! persist to a JSON file the control panel edits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::Error;

/// One periodic announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedMessage {
    pub name: String,
    pub message: String,
    /// Minutes between firings.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Chat lines required since this timer last fired.
    #[serde(default = "default_lines")]
    pub lines: u64,
}

fn default_interval() -> u32 {
    15
}

fn default_lines() -> u64 {
    2
}

/// When a timer last fired and where the global line counter stood.
struct FireRecord {
    at: DateTime<Utc>,
    line_count: u64,
}

struct TimerState {
    timers: Vec<TimedMessage>,
    line_count: u64,
    fired: HashMap<String, FireRecord>,
}

pub struct TimerManager {
    path: PathBuf,
    state: Mutex<TimerState>,
}

impl TimerManager {
    /// Opens the manager, loading any existing timer file. A missing or
    /// unreadable file starts with no timers rather than failing.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let timers = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<TimedMessage>>(&raw) {
                Ok(list) => list,
                Err(e) => {
                    warn!("Could not parse timers file {:?}: {e}", path);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        debug!("Loaded {} timers from {:?}", timers.len(), path);
        Self {
            path,
            state: Mutex::new(TimerState {
                timers,
                line_count: 0,
                fired: HashMap::new(),
            }),
        }
    }

    /// Called by the chat layer for every line seen in the channel.
    pub async fn record_chat_line(&self) {
        self.state.lock().await.line_count += 1;
    }

    /// Messages whose interval has elapsed and whose chat-line minimum is
    /// met as of `now`. Each returned timer is marked fired, resetting its
    /// line window; a timer that has never fired only waits on lines.
    pub async fn due_messages(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut state = self.state.lock().await;
        let line_count = state.line_count;
        let mut due = Vec::new();

        for timer in state.timers.clone() {
            let (time_ok, lines_since) = match state.fired.get(&timer.name) {
                Some(record) => (
                    now - record.at >= Duration::minutes(timer.interval as i64),
                    line_count.saturating_sub(record.line_count),
                ),
                None => (true, line_count),
            };
            if time_ok && lines_since >= timer.lines {
                info!("timer '{}' is due", timer.name);
                state.fired.insert(
                    timer.name.clone(),
                    FireRecord {
                        at: now,
                        line_count,
                    },
                );
                due.push(timer.message);
            }
        }

        due
    }

    pub async fn list_timers(&self) -> Vec<TimedMessage> {
        self.state.lock().await.timers.clone()
    }

    /// Adds (or replaces, by name) a timer and persists the table.
    pub async fn add_timer(&self, timer: TimedMessage) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.timers.retain(|t| t.name != timer.name);
        state.timers.push(timer);
        self.persist(&state.timers).await
    }

    /// Removes a timer by name and persists the table.
    pub async fn delete_timer(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.timers.retain(|t| t.name != name);
        state.fired.remove(name);
        self.persist(&state.timers).await
    }

    async fn persist(&self, timers: &[TimedMessage]) -> Result<(), Error> {
        let raw = serde_json::to_string_pretty(timers)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(name: &str, interval: u32, lines: u64) -> TimedMessage {
        TimedMessage {
            name: name.to_string(),
            message: format!("{name} message"),
            interval,
            lines,
        }
    }

    #[tokio::test]
    async fn quiet_chat_holds_the_timer() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TimerManager::open(dir.path().join("timers.json"));
        manager.add_timer(timer("socials", 15, 2)).await.unwrap();

        assert!(manager.due_messages(Utc::now()).await.is_empty());

        manager.record_chat_line().await;
        assert!(manager.due_messages(Utc::now()).await.is_empty());

        manager.record_chat_line().await;
        assert_eq!(
            manager.due_messages(Utc::now()).await,
            vec!["socials message".to_string()]
        );
    }

    #[tokio::test]
    async fn firing_resets_the_line_window_and_interval() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TimerManager::open(dir.path().join("timers.json"));
        manager.add_timer(timer("socials", 15, 1)).await.unwrap();

        manager.record_chat_line().await;
        let first = Utc::now();
        assert_eq!(manager.due_messages(first).await.len(), 1);

        // Lines satisfied again, but the interval has not elapsed.
        manager.record_chat_line().await;
        assert!(manager.due_messages(first).await.is_empty());

        // Interval elapsed and one line since the firing.
        let later = first + Duration::minutes(16);
        assert_eq!(manager.due_messages(later).await.len(), 1);

        // Interval elapsed again but chat went quiet.
        let much_later = later + Duration::minutes(16);
        assert!(manager.due_messages(much_later).await.is_empty());
    }

    #[tokio::test]
    async fn timers_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.json");

        {
            let manager = TimerManager::open(&path);
            manager.add_timer(timer("socials", 15, 2)).await.unwrap();
            manager.add_timer(timer("discord", 30, 5)).await.unwrap();
            manager.delete_timer("socials").await.unwrap();
        }

        let manager = TimerManager::open(&path);
        let timers = manager.list_timers().await;
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].name, "discord");
        assert_eq!(timers[0].interval, 30);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.json");
        std::fs::write(&path, "not json").unwrap();

        let manager = TimerManager::open(&path);
        assert!(manager.list_timers().await.is_empty());
    }

    #[tokio::test]
    async fn defaults_fill_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.json");
        std::fs::write(&path, r#"[{"name": "socials", "message": "follow!"}]"#).unwrap();

        let manager = TimerManager::open(&path);
        let timers = manager.list_timers().await;
        assert_eq!(timers[0].interval, 15);
        assert_eq!(timers[0].lines, 2);
    }
}
