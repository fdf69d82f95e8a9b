// src/lib.rs

pub mod counters;
pub mod http;
pub mod music;
pub mod services;
pub mod store;
pub mod template;

pub use http::{DefaultHttpClient, HttpClient};
pub use tunebot_common::Error;
