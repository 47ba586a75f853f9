use thiserror::Error;

#[derive(Error, Debug)]
pub enum SightlineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}
