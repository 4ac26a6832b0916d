//! Error taxonomy for the persistent-object store.
//!
//! Mirrors the split the runtime relies on: a handful of *typed faults* that
//! bubble up to the caller (bad arguments, out-of-range positions, a file
//! that went missing underneath us) and a class of conditions that are
//! never supposed to be survivable — resource exhaustion and anything that
//! would otherwise let the object file or index drift out of sync. The
//! latter are raised with [`fatal`], which logs and aborts the process
//! rather than returning a `Result` a caller could shrug off.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("range error: {0}")]
    Range(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("numargs error: {0}")]
    NumArgs(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database is corrupted: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Logs `msg` at error level and aborts the process.
///
/// Used for persistence failures or resource exhaustion: a dirty holder
/// that cannot be written back, a clean marker that cannot be created or
/// removed, an index that disagrees with the objects file at startup.
/// Continuing past any of these risks corrupting the object file, which
/// the design prioritizes over availability.
pub fn fatal(msg: impl AsRef<str>) -> ! {
    tracing::error!(target: "coldcore::fatal", "{}", msg.as_ref());
    panic!("{}", msg.as_ref());
}
