//! Error kinds for the redo log engine.
//!
//! Fast-path producers never observe these: IO errors are handled by the
//! writer thread (logged, retried, then fail-stop). This enum is the surface
//! used by control paths (open, recovery, checkpoint, capacity) where the
//! caller decides whether to retry or crash.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("out of space: {0}")]
    OutOfSpace(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    #[error("file format too old: {0}")]
    FormatTooOld(String),

    #[error("file format too new: {0}")]
    FormatTooNew(String),

    #[error("files inconsistent: {0}")]
    FilesInconsistent(String),

    #[error("files not initialized")]
    UninitializedFiles,

    #[error("redo logging disabled")]
    DisabledRedo,

    #[error("missing newest file")]
    MissingNewestFile,
}

pub type Result<T> = std::result::Result<T, LogError>;
