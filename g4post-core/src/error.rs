//! Error types for g4post-core.

use thiserror::Error;

/// Result type alias for g4post operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types shared by the pipeline layers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Unknown module kind, malformed instruction or invalid parameter.
    #[error("configuration error: {0}")]
    Config(String),

    /// A declared variable is absent from the store or the input source.
    #[error("missing variable `{0}`")]
    MissingKey(String),

    /// Correlated arrays disagree in nesting or length.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Malformed geometry description or unknown volume.
    #[error("geometry error: {0}")]
    Geometry(String),
}

impl Error {
    /// Returns true for errors that only skip the owning file task.
    #[must_use]
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Self::MissingKey(_))
    }

    /// Prefixes the message with `context`, keeping the variant.
    ///
    /// Missing keys keep the bare variable name.
    #[must_use]
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::Config(msg) => Self::Config(format!("{context}: {msg}")),
            Self::ShapeMismatch(msg) => Self::ShapeMismatch(format!("{context}: {msg}")),
            Self::Geometry(msg) => Self::Geometry(format!("{context}: {msg}")),
            Self::MissingKey(name) => Self::MissingKey(name),
        }
    }
}
