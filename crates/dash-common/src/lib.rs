#![doc = "Common types shared across the car-dash workspace."]

pub mod channel;
pub mod config;
pub mod error;
pub mod time;

pub use channel::*;
pub use config::*;
pub use error::*;
pub use time::*;
