// src/filesystem/mod.rs

//! Filesystem helpers shared by the builder and the installer
//!
//! Archive entry names come from untrusted input at install time, so every
//! path that is written to disk goes through [`path::safe_join`].

pub mod path;

pub use path::{normalize_entry_path, safe_join};
