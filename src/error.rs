//! Error types for KeelDB
//!
//! Every failure the engine reports is a variant of [`Error`]. Variants are
//! grouped into the coarse [`ErrorKind`] taxonomy that callers branch on,
//! e.g. to decide whether a transaction should be retried.

use std::fmt;

use thiserror::Error;

/// Coarse error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SyntaxError,
    CatalogError,
    ConstraintViolation,
    CardinalityViolation,
    TypeMismatch,
    LockTimeout,
    DeadlockDetected,
    SerializationFailure,
    /// Division by zero and every other arithmetic failure, overflow included
    DivisionByZero,
    /// Misuse of the transaction state machine (nested BEGIN, COMMIT without BEGIN, ...)
    TransactionState,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::CatalogError => "CatalogError",
            ErrorKind::ConstraintViolation => "ConstraintViolation",
            ErrorKind::CardinalityViolation => "CardinalityViolation",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::LockTimeout => "LockTimeout",
            ErrorKind::DeadlockDetected => "DeadlockDetected",
            ErrorKind::SerializationFailure => "SerializationFailure",
            ErrorKind::DivisionByZero => "DivisionByZero",
            ErrorKind::TransactionState => "TransactionState",
            ErrorKind::Io => "Io",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// The main error type for KeelDB
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lexer Errors ==========
    #[error("Lexer error: unexpected character '{0}' at position {1}")]
    UnexpectedCharacter(char, usize),

    #[error("Lexer error: unterminated string literal starting at position {0}")]
    UnterminatedString(usize),

    #[error("Lexer error: invalid number format at position {0}")]
    InvalidNumber(usize),

    // ========== Parser Errors ==========
    #[error("Parse error: unexpected token '{found}', expected {expected}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Parse error: unexpected end of input, expected {0}")]
    UnexpectedEof(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Parse error: no value bound for parameter ${0}")]
    MissingParameter(usize),

    // ========== Catalog Errors ==========
    #[error("Catalog error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Catalog error: view '{0}' not found")]
    ViewNotFound(String),

    #[error("Catalog error: relation '{0}' already exists")]
    DuplicateName(String),

    #[error("Catalog error: column '{0}' not found in '{1}'")]
    ColumnNotFound(String, String),

    #[error("Catalog error: column reference '{0}' is ambiguous")]
    AmbiguousColumn(String),

    #[error("Catalog error: column '{0}' already exists in table '{1}'")]
    ColumnExists(String, String),

    #[error("Catalog error: index '{0}' not found")]
    IndexNotFound(String),

    #[error("Catalog error: index '{0}' already exists")]
    IndexAlreadyExists(String),

    #[error("Catalog error: constraint '{0}' not found on table '{1}'")]
    ConstraintNotFound(String, String),

    #[error("Catalog error: invalid constraint - {0}")]
    InvalidConstraint(String),

    #[error("Catalog error: table '{table}' is referenced by foreign key '{constraint}' on '{referencing}'")]
    ForeignKeyReferenced {
        table: String,
        constraint: String,
        referencing: String,
    },

    #[error("Catalog error: column '{0}' must appear in GROUP BY or be used in an aggregate")]
    InvalidGrouping(String),

    #[error("Catalog error: unknown function '{0}'")]
    UnknownFunction(String),

    // ========== Type Errors ==========
    #[error("Type error: cannot convert {from} to {to}")]
    TypeMismatch { from: String, to: String },

    #[error("Type error: column '{column}' cannot be narrowed to {to}: value {value} does not convert losslessly")]
    TypeNarrowing {
        column: String,
        to: String,
        value: String,
    },

    #[error("Type error: value too large for column '{0}'")]
    ValueTooLarge(String),

    // ========== Constraint Errors ==========
    #[error("Constraint violation: null value in column '{column}' of table '{table}' violates NOT NULL")]
    NullNotAllowed { table: String, column: String },

    #[error("Constraint violation: duplicate key violates unique constraint '{0}'")]
    UniqueViolation(String),

    #[error("Constraint violation: row violates check constraint '{0}'")]
    CheckViolation(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    // ========== Execution Errors ==========
    #[error("Cardinality violation: {0}")]
    CardinalityViolation(String),

    #[error("Execution error: division by zero")]
    DivisionByZero,

    #[error("Execution error: numeric overflow")]
    NumericOverflow,

    #[error("Execution error: recursive query exceeded {0} iterations")]
    RecursionLimitExceeded(usize),

    #[error("Execution error: trigger nesting exceeded {0} levels")]
    TriggerDepthExceeded(usize),

    #[error("Execution error: trigger on '{table}' failed: {message}")]
    TriggerFailed { table: String, message: String },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    // ========== Transaction Errors ==========
    #[error("Transaction error: a transaction is already in progress")]
    NestedTransaction,

    #[error("Transaction error: no transaction is in progress")]
    NoActiveTransaction,

    #[error("Transaction error: current transaction is aborted, commands ignored until ROLLBACK")]
    TransactionAborted,

    #[error("Transaction error: isolation level cannot change after the first statement")]
    IsolationLevelLocked,

    #[error("Transaction error: lock wait timed out after {0} ms")]
    LockTimeout(u128),

    #[error("Transaction error: deadlock detected, transaction {0} chosen as victim")]
    DeadlockDetected(u64),

    #[error("Transaction error: could not serialize access due to {0}")]
    SerializationFailure(String),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error into the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnexpectedCharacter(..)
            | Error::UnterminatedString(_)
            | Error::InvalidNumber(_)
            | Error::UnexpectedToken { .. }
            | Error::UnexpectedEof(_)
            | Error::ParseError(_)
            | Error::MissingParameter(_) => ErrorKind::SyntaxError,

            Error::TableNotFound(_)
            | Error::ViewNotFound(_)
            | Error::DuplicateName(_)
            | Error::ColumnNotFound(..)
            | Error::AmbiguousColumn(_)
            | Error::ColumnExists(..)
            | Error::IndexNotFound(_)
            | Error::IndexAlreadyExists(_)
            | Error::ConstraintNotFound(..)
            | Error::InvalidConstraint(_)
            | Error::ForeignKeyReferenced { .. }
            | Error::InvalidGrouping(_)
            | Error::UnknownFunction(_) => ErrorKind::CatalogError,

            Error::TypeMismatch { .. } | Error::TypeNarrowing { .. } | Error::ValueTooLarge(_) => {
                ErrorKind::TypeMismatch
            }

            Error::NullNotAllowed { .. }
            | Error::UniqueViolation(_)
            | Error::CheckViolation(_)
            | Error::ConstraintViolation(_)
            | Error::ForeignKeyViolation(_) => ErrorKind::ConstraintViolation,

            Error::CardinalityViolation(_) => ErrorKind::CardinalityViolation,
            Error::DivisionByZero | Error::NumericOverflow => ErrorKind::DivisionByZero,

            Error::RecursionLimitExceeded(_)
            | Error::TriggerDepthExceeded(_)
            | Error::TriggerFailed { .. }
            | Error::ExecutionError(_)
            | Error::Internal(_) => ErrorKind::Internal,

            Error::NestedTransaction
            | Error::NoActiveTransaction
            | Error::TransactionAborted
            | Error::IsolationLevelLocked => ErrorKind::TransactionState,

            Error::LockTimeout(_) => ErrorKind::LockTimeout,
            Error::DeadlockDetected(_) => ErrorKind::DeadlockDetected,
            Error::SerializationFailure(_) => ErrorKind::SerializationFailure,

            Error::IoError(_) | Error::Serde(_) => ErrorKind::Io,
        }
    }

    /// Whether re-issuing the whole transaction may succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SerializationFailure | ErrorKind::DeadlockDetected
        )
    }
}

/// Result type alias for KeelDB operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TableNotFound("users".to_string());
        assert_eq!(err.to_string(), "Catalog error: table 'users' not found");

        let err = Error::UnexpectedCharacter('@', 5);
        assert_eq!(
            err.to_string(),
            "Lexer error: unexpected character '@' at position 5"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::UniqueViolation("users_pkey".into()).kind(),
            ErrorKind::ConstraintViolation
        );
        assert_eq!(
            Error::ForeignKeyViolation("books_author_id_fkey".into()).kind(),
            ErrorKind::ConstraintViolation
        );
        assert_eq!(Error::DuplicateName("t".into()).kind(), ErrorKind::CatalogError);
        assert_eq!(Error::LockTimeout(10).kind(), ErrorKind::LockTimeout);
        assert_eq!(Error::NumericOverflow.kind(), ErrorKind::DivisionByZero);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::SerializationFailure("concurrent update".into()).is_retryable());
        assert!(Error::DeadlockDetected(7).is_retryable());
        assert!(!Error::LockTimeout(100).is_retryable());
        assert!(!Error::ParseError("x".into()).is_retryable());
        assert!(!Error::TableNotFound("x".into()).is_retryable());
    }
}
