mod backend;
mod cache;
mod chunking;
mod config;
mod engine;
mod memory;
mod mount;
mod node;
mod path;
mod token;
mod tree;


pub use backend::*;
pub use cache::*;
pub use chunking::*;
pub use config::*;
pub use engine::*;
pub use memory::*;
pub use mount::*;
pub use node::*;
pub use path::*;
pub use token::*;
pub use tree::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NxError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("type mismatch at: {0}")]
    TypeMismatch(String),
    #[error("dataset is not the last path segment: {0}")]
    DatasetNotLeaf(String),
    #[error("malformed path: {0}")]
    MalformedPath(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("mount target unreachable: {0}")]
    MountUnreachable(String),
    #[error("too many link redirections: {0}")]
    LinkCycle(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("backend failure at {path}: {reason}")]
    BackendFailure { path: String, reason: String },
}

impl NxError {
    pub fn backend(path: impl Into<String>, reason: impl ToString) -> Self {
        NxError::BackendFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NxError::NotFound(_))
    }

    /// The path an error is about, for the kinds that carry one.
    pub fn path(&self) -> Option<&str> {
        match self {
            NxError::NotFound(p)
            | NxError::TypeMismatch(p)
            | NxError::DatasetNotLeaf(p)
            | NxError::MalformedPath(p)
            | NxError::AlreadyExists(p)
            | NxError::MountUnreachable(p)
            | NxError::LinkCycle(p)
            | NxError::Unsupported(p) => Some(p.as_str()),
            NxError::BackendFailure { path, .. } => Some(path.as_str()),
            _ => None,
        }
    }
}

pub type NxResult<T> = std::result::Result<T, NxError>;

impl From<std::io::Error> for NxError {
    fn from(err: std::io::Error) -> Self {
        NxError::IoError(err.to_string())
    }
}
