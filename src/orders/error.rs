use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unknown order state: {0}")]
    UnknownState(String),

    #[error("unknown order field value: {field}={value}")]
    UnknownField { field: &'static str, value: String },

    #[error("order not found: {0}")]
    NotFound(Uuid),
}
