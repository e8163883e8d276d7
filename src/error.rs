use crate::path::{Path, PathError};
use crate::transport::RpcError;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Application failures raised by filesystem interfaces.
///
/// These travel back to the calling stub unchanged, so a `NotFound` raised by
/// a storage server is the same `NotFound` the client observes.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FsError {
    #[error("{0} not found")]
    NotFound(Path),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("range [{offset}, {offset}+{length}) out of bounds for {path} of size {size}")]
    OutOfRange {
        path: Path,
        offset: u64,
        length: u64,
        size: u64,
    },
    #[error("i/o error on {path}: {cause}")]
    Io { path: Path, cause: String },
    #[error("storage server {0} is already registered")]
    AlreadyRegistered(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl FsError {
    pub(crate) fn io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.clone()),
            _ => FsError::Io {
                path: path.clone(),
                cause: err.to_string(),
            },
        }
    }
}

impl From<PathError> for FsError {
    fn from(err: PathError) -> Self {
        FsError::InvalidArgument(err.to_string())
    }
}

pub type Result<T> = core::result::Result<T, FsError>;
