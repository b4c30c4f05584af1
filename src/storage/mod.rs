//! Durable storage backends

mod schema;
pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::types::ClearanceError;

impl From<sqlx::Error> for ClearanceError {
    fn from(err: sqlx::Error) -> Self {
        ClearanceError::Storage(err.to_string())
    }
}

/// True when the error is a UNIQUE or PRIMARY KEY constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
