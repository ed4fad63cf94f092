//! API handlers. Each module delegates to the queue and hub contracts.

pub mod config;
pub mod downloads;
pub mod events;
pub mod history;
