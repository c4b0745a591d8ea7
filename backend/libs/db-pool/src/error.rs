//! Classification of PostgreSQL errors.
//!
//! Services call [`classify`] once at their store boundary instead of matching SQLSTATE
//! codes or message text in business code.

use thiserror::Error;

/// What a failed statement means to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DbErrorKind {
    #[error("duplicate key")]
    UniqueViolation,
    #[error("foreign key violation")]
    ForeignKeyViolation,
    #[error("not null violation")]
    NotNullViolation,
    #[error("invalid input syntax")]
    InvalidInput,
    #[error("serialization failure or deadlock")]
    Serialization,
    #[error("database connection unavailable")]
    Connection,
    #[error("row not found")]
    NotFound,
    #[error("database error")]
    Other,
}

impl DbErrorKind {
    /// Whether retrying the same statement later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbErrorKind::Serialization | DbErrorKind::Connection)
    }

    /// Whether the statement was rejected because of the data the caller supplied.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            DbErrorKind::UniqueViolation
                | DbErrorKind::ForeignKeyViolation
                | DbErrorKind::NotNullViolation
                | DbErrorKind::InvalidInput
        )
    }
}

/// Map a sqlx error to its [`DbErrorKind`].
pub fn classify(err: &sqlx::Error) -> DbErrorKind {
    match err {
        sqlx::Error::RowNotFound => DbErrorKind::NotFound,
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => DbErrorKind::Connection,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => classify_sqlstate(&code),
            None => DbErrorKind::Other,
        },
        _ => DbErrorKind::Other,
    }
}

fn classify_sqlstate(code: &str) -> DbErrorKind {
    match code {
        "23505" => DbErrorKind::UniqueViolation,
        "23503" => DbErrorKind::ForeignKeyViolation,
        "23502" => DbErrorKind::NotNullViolation,
        "22P02" => DbErrorKind::InvalidInput,
        "40001" | "40P01" => DbErrorKind::Serialization,
        // admin_shutdown, crash_shutdown, cannot_connect_now
        "57P01" | "57P02" | "57P03" => DbErrorKind::Connection,
        c if c.starts_with("08") => DbErrorKind::Connection,
        _ => DbErrorKind::Other,
    }
}
