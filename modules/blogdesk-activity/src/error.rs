use thiserror::Error;

pub type Result<T> = std::result::Result<T, ActivityLogError>;

#[derive(Debug, Error)]
pub enum ActivityLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt activity record {id}: {reason}")]
    Corrupt { id: uuid::Uuid, reason: String },
}
