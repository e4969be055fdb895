//! Core engine modules.

pub mod checksum;
pub mod database;
pub mod engine;
pub mod executor;
pub mod history;
pub mod mover;
pub mod queue;
pub mod reaper;
pub mod recovery;
pub mod transfer;
pub mod undo;
