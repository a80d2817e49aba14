use std::path::PathBuf;

use redo_log::LogConfig;

/// How to open a `StorageEngine`. `Base` is the common case — a plain
/// directory holding the redo log; `Custom` lets a caller hand-tune the
/// underlying `LogConfig` (buffer size, capacity, fsync behavior) directly,
/// which the test suite leans on to skip fsyncs.
pub enum StoragePreset {
    Base { base_dir: PathBuf },
    Custom(LogConfig),
}

impl StoragePreset {
    pub fn base(base_dir: impl Into<PathBuf>) -> Self {
        Self::Base { base_dir: base_dir.into() }
    }

    pub fn custom(config: LogConfig) -> Self {
        Self::Custom(config)
    }
}
