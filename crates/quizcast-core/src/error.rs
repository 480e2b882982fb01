//! Unified error types for Quizcast.

use thiserror::Error;

/// Result type alias using QuizcastError.
pub type Result<T> = std::result::Result<T, QuizcastError>;

#[derive(Error, Debug)]
pub enum QuizcastError {
    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Delivery errors
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl QuizcastError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
}
