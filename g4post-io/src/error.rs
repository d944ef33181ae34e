//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error in a configuration or input file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Input format not compiled in or unknown.
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Worker pool could not be created.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Core library error.
    #[error("{0}")]
    CoreError(#[from] g4post_core::Error),
}

impl Error {
    /// Returns true if the error only means a declared field is absent.
    #[must_use]
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Self::CoreError(e) if e.is_missing_key())
    }
}
