use std::path::PathBuf;

use thiserror::Error;

use crate::document::DocumentError;

/// Errors reading or writing a group's on-disk state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown group {0}")]
    UnknownGroup(String),

    #[error("Group {0} already exists")]
    AlreadyExists(String),

    #[error("Invalid group name: {0:?}")]
    InvalidName(String),

    #[error("Group {0} has no members")]
    NoMembers(String),

    #[error("Group document {path} names group {found:?}, expected {expected:?}")]
    NameMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Bad group document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that end a harvest run. Everything member-level is absorbed
/// into a `MemberOutcome` instead.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("The operating account has been deactivated by the platform")]
    AccountDeactivated,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarvestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarvestError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors after which no further platform calls should be made.
    pub fn is_account_fatal(&self) -> bool {
        matches!(self, HarvestError::AccountDeactivated)
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
