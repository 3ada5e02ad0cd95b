//! Unified error model for the store.
//! One root enum is used across every layer; lifecycle guards, the domain
//! engine and the filesystem layer all surface through it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsdbError>;

#[derive(Debug, Error)]
pub enum FsdbError {
    /// An addressed database, table or record does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A handle whose underlying entity has been deleted was used.
    #[error("can't access deleted {0} objects")]
    ObjectDeleted(&'static str),

    /// A handle reached through a closed database was used.
    #[error("database is closed")]
    DatabaseClosed,

    /// Malformed or unevaluable search domain.
    #[error("invalid search domain: {0}")]
    Domain(String),

    /// Malformed order clause.
    #[error("invalid record order: {0}")]
    Order(String),

    /// Filesystem errors propagate as is.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// All other invariant violations (invalid field type, reserved name,
    /// id collision, schema mismatch, unsupported value).
    #[error("{0}")]
    Generic(String),
}

impl FsdbError {
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        FsdbError::Generic(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        FsdbError::ObjectNotFound(msg.into())
    }

    pub fn domain<S: Into<String>>(msg: S) -> Self {
        FsdbError::Domain(msg.into())
    }

    pub fn order<S: Into<String>>(msg: S) -> Self {
        FsdbError::Order(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = FsdbError::not_found("database \"main\" does not exist");
        assert_eq!(err.to_string(), "object not found: database \"main\" does not exist");

        let err = FsdbError::ObjectDeleted("record");
        assert_eq!(err.to_string(), "can't access deleted record objects");

        assert_eq!(FsdbError::DatabaseClosed.to_string(), "database is closed");
    }

    #[test]
    fn io_errors_pass_through() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FsdbError = io.into();
        assert!(matches!(err, FsdbError::Io(_)));
    }
}
