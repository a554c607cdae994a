use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Build error: {0}")]
    Build(String),

    #[error("Not georeferenced: {0}")]
    NotGeoreferenced(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Machine-readable error category, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Io,
    Integrity,
    Build,
    NotGeoreferenced,
    Auth,
}

impl IndexError {
    /// Wraps an IO error together with the path that produced it.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Io { .. } => ErrorKind::Io,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Build(_) => ErrorKind::Build,
            Self::NotGeoreferenced(_) => ErrorKind::NotGeoreferenced,
            Self::Auth(_) => ErrorKind::Auth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_path() {
        let error = IndexError::io(
            "/data/a.tif",
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(error.to_string().contains("/data/a.tif"));
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotGeoreferenced).unwrap();
        assert_eq!(json, "\"not_georeferenced\"");
    }
}
