use serde::{Deserialize, Serialize};

use crate::models::command::Permission;

/// The chatter who triggered a command, with the role flags the chat
/// platform reported for that message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Chatter {
    pub name: String,
    #[serde(default)]
    pub is_subscriber: bool,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub is_broadcaster: bool,
}

impl Chatter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Highest permission level this chatter satisfies.
    pub fn highest_role(&self) -> Permission {
        if self.is_broadcaster {
            Permission::Broadcaster
        } else if self.is_moderator {
            Permission::Moderator
        } else if self.is_subscriber {
            Permission::Subscriber
        } else {
            Permission::Everyone
        }
    }

    pub fn can_run(&self, required: Permission) -> bool {
        self.highest_role() >= required
    }
}
