pub mod command_service;
pub mod timers;

pub use command_service::{CommandResponse, CommandService};
pub use timers::{TimedMessage, TimerManager};
