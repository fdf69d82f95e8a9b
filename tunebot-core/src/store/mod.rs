//! Read side of the externally managed data files.
//!
//! The GUI owns edits and the Gist publisher owns the public command
//! list; this core only needs to read the command table, the response
//! templates, and the settings. Everything is plain serde JSON, tolerant
//! of missing files, matching the data directory layout the control
//! panel writes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::Error;
use tunebot_common::models::BotSettings;
use tunebot_common::models::command::{Command, normalize_trigger};

#[async_trait]
pub trait CommandRepository: Send + Sync {
    /// Looks up a command by trigger or alias, case-insensitively.
    async fn get_command(&self, trigger: &str) -> Result<Option<Command>, Error>;
    async fn list_commands(&self) -> Result<Vec<Command>, Error>;
}

/// Command table loaded from `commands.json`. Triggers and aliases share
/// one namespace; duplicates are skipped with a warning so one bad edit
/// cannot shadow an existing command.
pub struct JsonCommandStore {
    commands: RwLock<Vec<Command>>,
    /// trigger/alias -> index into `commands`.
    lookup: RwLock<HashMap<String, usize>>,
}

impl JsonCommandStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let commands: Vec<Command> = match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => {
                warn!("commands file {:?} missing, starting empty", path.as_ref());
                Vec::new()
            }
        };
        Ok(Self::from_commands(commands))
    }

    pub fn from_commands(commands: Vec<Command>) -> Self {
        let lookup = build_lookup(&commands);
        debug!("command store holds {} commands", commands.len());
        Self {
            commands: RwLock::new(commands),
            lookup: RwLock::new(lookup),
        }
    }

    /// Replaces the table in place, for the file-watching reload path.
    pub async fn replace(&self, commands: Vec<Command>) {
        let lookup = build_lookup(&commands);
        *self.commands.write().await = commands;
        *self.lookup.write().await = lookup;
    }
}

fn build_lookup(commands: &[Command]) -> HashMap<String, usize> {
    let mut lookup = HashMap::new();
    for (idx, cmd) in commands.iter().enumerate() {
        let trigger = normalize_trigger(&cmd.trigger);
        if lookup.insert(trigger.clone(), idx).is_some() {
            warn!("duplicate command trigger '{trigger}', later entry wins");
        }
        for alias in &cmd.aliases {
            let alias = normalize_trigger(alias);
            if lookup.contains_key(&alias) {
                warn!("alias '{alias}' collides with an existing trigger, skipping");
                continue;
            }
            lookup.insert(alias, idx);
        }
    }
    lookup
}

#[async_trait]
impl CommandRepository for JsonCommandStore {
    async fn get_command(&self, trigger: &str) -> Result<Option<Command>, Error> {
        let key = normalize_trigger(trigger);
        let lookup = self.lookup.read().await;
        let Some(&idx) = lookup.get(&key) else {
            return Ok(None);
        };
        Ok(self.commands.read().await.get(idx).cloned())
    }

    async fn list_commands(&self) -> Result<Vec<Command>, Error> {
        Ok(self.commands.read().await.clone())
    }
}

/// One operator-editable response template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTemplate {
    pub template: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

/// Keyed response templates for the music paths (`sr_success`,
/// `sr_error`, `song_success`, ...). Ships with defaults so a missing
/// `responses.json` still produces sensible chat output.
pub struct ResponseStore {
    templates: HashMap<String, ResponseTemplate>,
}

impl ResponseStore {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let mut store = Self::with_defaults();
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, ResponseTemplate>>(&raw) {
                Ok(loaded) => store.templates.extend(loaded),
                Err(e) => warn!("could not parse responses file: {e}"),
            },
            Err(_) => debug!("responses file missing, using defaults"),
        }
        store
    }

    pub fn with_defaults() -> Self {
        let mut templates = HashMap::new();
        let mut add = |key: &str, template: &str| {
            templates.insert(
                key.to_string(),
                ResponseTemplate {
                    template: template.to_string(),
                    enabled: true,
                },
            );
        };
        add(
            "sr_success",
            "{user} queued {track_name} by {artist}! {url}",
        );
        add("sr_error", "@{user} could not queue \"{query}\": {error_message}");
        add("sr_disabled", "@{user} song requests are currently disabled.");
        add("sr_offline", "@{user} song requests are disabled while the stream is offline.");
        add("song_success", "Now playing: {track_name} by {artist} ({album}) {url}");
        add("song_error", "@{user} nothing seems to be playing right now.");
        Self { templates }
    }

    /// Template text for `key`, if present and enabled.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.templates
            .get(key)
            .filter(|t| t.enabled)
            .map(|t| t.template.as_str())
    }

    pub fn insert(&mut self, key: &str, template: ResponseTemplate) {
        self.templates.insert(key.to_string(), template);
    }
}

/// Loads `settings.json`, falling back to defaults when the file is
/// missing or mid-write.
pub fn load_settings(path: impl AsRef<Path>) -> Arc<RwLock<BotSettings>> {
    let settings = match std::fs::read_to_string(path.as_ref()) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("could not parse settings file: {e}, using defaults");
                BotSettings::default()
            }
        },
        Err(_) => BotSettings::default(),
    };
    Arc::new(RwLock::new(settings))
}
