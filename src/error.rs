use std::io;
use std::path::PathBuf;

/// File-scoped failures raised while decoding, patching or writing one bundle entry.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("malformed bundle block '{path}': {message}")]
    Format { path: String, message: String },

    #[error("cannot decode '{path}' as {encoding}: {message}")]
    Encoding {
        path: String,
        encoding: String,
        message: String,
    },

    #[error("invalid delta range for '{path}': {message}")]
    DeltaRange { path: String, message: String },

    #[error("path '{raw}' escapes the output root: resolves to '{resolved}'")]
    PathSecurity { raw: String, resolved: PathBuf },

    #[error("I/O failure on '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl BundleError {
    pub fn format(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn delta_range(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeltaRange {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
