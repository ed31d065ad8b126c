//! Custom error types for the common library
//!
//! This module defines the database error taxonomy shared by every crate
//! that talks to MongoDB.

use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred while establishing the client or reaching the server
    #[error("Database connection error: {0}")]
    Connection(#[source] MongoError),

    /// Error occurred during a database command
    #[error("Database query error: {0}")]
    Query(#[source] MongoError),

    /// The server answered with something the caller cannot use
    #[error("Unexpected database response: {0}")]
    UnexpectedResponse(String),

    /// The backend refused to serve the request
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// The write clashes with existing data (duplicate key, index options)
    #[error("Database conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;
