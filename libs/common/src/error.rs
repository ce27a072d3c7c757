//! Custom error types for the common library
//!
//! This module defines the error type returned by the credential store
//! gateways and the database bootstrap helpers.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for credential store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error occurred while connecting or opening a transaction
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during query execution or commit
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),

    /// A stored row could not be decoded into a credential
    #[error("Invalid credential row {id}: {reason}")]
    InvalidRow { id: i64, reason: String },

    /// The batch was already committed or rolled back
    #[error("Batch transaction is closed")]
    Closed,
}

/// Type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;
