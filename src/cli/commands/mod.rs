//! CLI command implementations.

pub mod queue;
pub mod run;
pub mod status;
pub mod submit;
pub mod undo;
