use thiserror::Error;

/// Library error type for picture-set engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An order policy name the engine does not know about. Valid
    /// configuration never produces this; it indicates a config-schema or
    /// cache-format mismatch.
    #[error("unsupported order policy: {0}")]
    UnsupportedPolicy(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    /// JSON error while reading or writing cache files.
    #[error(transparent)]
    Cache(#[from] serde_json::Error),
}
