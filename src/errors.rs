//! Typed error hierarchy for the taskboard server.
//!
//! `BoardError` is what store operations and handlers agree on. Store code
//! that only needs context uses `anyhow` and is folded into
//! `BoardError::Database` at the API boundary; operations whose failure kind
//! matters to the caller (reorder, membership, auth) return a `BoardError`
//! directly, possibly wrapped in an `anyhow::Error` that is downcast later.
//!
//! `ClientError` is the optimistic client's counterpart.

use thiserror::Error;

use crate::client::transport::TransportError;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Member {id} not found")]
    MemberNotFound { id: String },

    #[error("You do not have permission to perform this action")]
    PermissionDenied,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store is busy, retry the operation: {0}")]
    TransientStore(#[source] rusqlite::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl BoardError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProjectNotFound { .. }
                | Self::TaskNotFound { .. }
                | Self::UserNotFound(_)
                | Self::MemberNotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::TransientStore(err),
            _ => Self::Database(err.into()),
        }
    }
}

impl From<anyhow::Error> for BoardError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BoardError>() {
            Ok(board) => board,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(sqlite) => Self::from(sqlite),
                Err(other) => Self::Database(other),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Task {0} is not on the board")]
    UnknownTask(String),

    #[error("Task {0} already has a pending delete")]
    DeletePending(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    #[test]
    fn busy_sqlite_errors_are_transient() {
        assert!(matches!(BoardError::from(busy()), BoardError::TransientStore(_)));
    }

    #[test]
    fn other_sqlite_errors_are_database_errors() {
        let err = BoardError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, BoardError::Database(_)));
    }

    #[test]
    fn anyhow_wrapped_board_error_is_recovered() {
        let wrapped = anyhow::Error::new(BoardError::TaskNotFound { id: "t1".into() });
        let err = BoardError::from(wrapped);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Task t1 not found");
    }

    #[test]
    fn anyhow_wrapped_busy_error_stays_transient() {
        let wrapped = anyhow::Error::new(busy());
        assert!(matches!(BoardError::from(wrapped), BoardError::TransientStore(_)));
    }

    #[test]
    fn plain_anyhow_becomes_database_error() {
        let err = BoardError::from(anyhow::anyhow!("disk full"));
        match err {
            BoardError::Database(inner) => assert_eq!(inner.to_string(), "disk full"),
            other => panic!("Expected Database variant, got {other:?}"),
        }
    }

    #[test]
    fn client_error_wraps_transport_error() {
        let err = ClientError::from(TransportError::Network("reset".into()));
        assert_eq!(err.to_string(), "Network error: reset");
        assert_eq!(
            ClientError::DeletePending("t1".into()).to_string(),
            "Task t1 already has a pending delete"
        );
    }
}
