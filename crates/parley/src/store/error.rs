//! Credential storage errors.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("file i/o error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid credentials at {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode credentials: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl CredentialError {
    pub fn file_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn deserialize(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Self::Deserialize {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
