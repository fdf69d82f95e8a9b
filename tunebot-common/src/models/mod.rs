// File: tunebot-common/src/models/mod.rs
pub mod command;
pub mod music;
pub mod settings;
pub mod user;

pub use command::{Command, Permission};
pub use music::{MusicErrorCode, MusicService, RequestOutcome, TrackInfo};
pub use settings::BotSettings;
pub use user::Chatter;
