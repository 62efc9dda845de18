use thiserror::Error;

/// Failures raised by the store layer.
///
/// Configuration problems (bad path, no compressor) are fatal at session
/// construction. I/O problems during a save abort that save and leave the
/// previous snapshot intact. Lookup misses are not errors at all; see
/// `epm_domain::SeriesMatch`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid series database path: {0:?}")]
    InvalidPath(String),

    #[error("no compressor available (tried: {tried})")]
    NoCompressor { tried: String },

    #[error("{verb} {path} failed: exit code {code}")]
    CompressorFailed {
        verb: &'static str,
        path: String,
        code: i32,
    },

    #[error("no backup available at {0}")]
    NoBackup(String),

    #[error("failed to serialize series database")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to parse series database")]
    Parse(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
