// src/commands/mod.rs
//! Command handlers for the stowage CLI

mod build;
mod inspect;
pub mod progress;
mod upgrade;

pub use build::cmd_build;
pub use inspect::cmd_inspect;
pub use upgrade::cmd_upgrade;
