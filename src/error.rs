use thiserror::Error;

/// Main error type for Mailspool
#[derive(Error, Debug)]
pub enum MailspoolError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// MIME decode failures (terminal for that attempt, no partial output)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    Invalid(String),
}

/// Convenient Result type using MailspoolError
pub type Result<T> = std::result::Result<T, MailspoolError>;
