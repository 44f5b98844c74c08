use thiserror::Error;

/// Errors that can occur in the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job with the given ID exists.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A job with the given name already exists (name carries a unique index).
    #[error("Duplicate job name: {name}")]
    DuplicateName { name: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
