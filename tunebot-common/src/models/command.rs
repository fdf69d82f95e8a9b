use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum role required to run a command. Ordered so that a higher role
/// satisfies every lower requirement (a moderator can run subscriber
/// commands, the broadcaster can run everything).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Everyone,
    Subscriber,
    Moderator,
    Broadcaster,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Everyone => "everyone",
            Permission::Subscriber => "subscriber",
            Permission::Moderator => "moderator",
            Permission::Broadcaster => "broadcaster",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "everyone" => Ok(Permission::Everyone),
            "subscriber" => Ok(Permission::Subscriber),
            "moderator" | "mod" => Ok(Permission::Moderator),
            "broadcaster" => Ok(Permission::Broadcaster),
            other => Err(crate::Error::Parse(format!("unknown permission '{other}'"))),
        }
    }
}

/// A chat command (e.g. `!song`) with its stored response template.
///
/// Triggers are stored without the `!` prefix and compared
/// case-insensitively. The usage counter lives in the counter store, keyed
/// by trigger, not on this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    /// Unique trigger, lowercase, no `!`.
    pub trigger: String,
    /// Alternative triggers mapping to this command. Unique across the
    /// whole command set, triggers included.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Response template containing `$(...)` / `{...}` references.
    pub response: String,
    #[serde(default)]
    pub min_permission: Permission,
    /// Free-form classification tag ("custom", "music-request", ...).
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub cooldown_seconds: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Command {
    pub fn new(trigger: &str, response: &str) -> Self {
        let now = Utc::now();
        Self {
            command_id: Uuid::new_v4(),
            trigger: normalize_trigger(trigger),
            aliases: Vec::new(),
            response: response.to_string(),
            min_permission: Permission::Everyone,
            kind: "custom".to_string(),
            is_active: true,
            cooldown_seconds: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lowercases a trigger and strips an optional `!` prefix so that
/// `!Song`, `!song` and `song` all key the same command.
pub fn normalize_trigger(raw: &str) -> String {
    raw.trim().trim_start_matches('!').to_lowercase()
}
