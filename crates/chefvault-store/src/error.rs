//! Errors surfaced by Chef Server collaborators
//!
//! The vault layer only branches on two conditions: 409 (the item already
//! exists) and 404 (the target is missing). Everything else is fatal.

use thiserror::Error;

pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{resource} already exists")]
    Conflict { resource: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Server returned {status} for {resource}: {message}")]
    Remote {
        status: u16,
        resource: String,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Classify a status-bearing response from the server.
    pub fn from_status(
        status: u16,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let resource = resource.into();
        match status {
            STATUS_CONFLICT => Self::Conflict { resource },
            STATUS_NOT_FOUND => Self::NotFound { resource },
            _ => Self::Remote {
                status,
                resource,
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Conflict { .. } => Some(STATUS_CONFLICT),
            Self::NotFound { .. } => Some(STATUS_NOT_FOUND),
            Self::Remote { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }

    /// 409: a create hit an existing item.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(STATUS_CONFLICT)
    }

    /// 404: the target does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(STATUS_NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
