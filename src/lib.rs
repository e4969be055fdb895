//! Array Balancer Library
//!
//! Safe file-migration engine for multi-disk storage arrays: a durable task
//! queue, a checksum-verified move executor and a time-bounded undo log.

pub mod cli;
pub mod core;
pub mod error;
pub mod models;
pub mod preflight;
pub mod utils;

pub use error::{Error, Result};
