//! Shared infrastructure utilities for Forge.
//!
//! This crate provides cross-cutting utilities that multiple Forge crates need
//! but that don't belong in the domain-pure `forge-types` crate:
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)
//! - **`security`**: Secret redaction for logs and error messages

pub mod atomic_write;
pub mod security;

pub use atomic_write::{
    AtomicWriteOptions, FileSyncPolicy, ParentDirSyncPolicy, PersistMode, atomic_write,
    atomic_write_new_with_options, atomic_write_with_options, recover_bak_file,
};
pub use security::redact_secrets;
