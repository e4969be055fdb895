//! Data models.

pub mod config;
pub mod history;
pub mod task;
pub mod undo;
