use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0} must be set")]
    MissingConfig(&'static str),
    #[error("Error fetching progress data: {0}")]
    Fetch(#[source] sqlx::Error),
    #[error("Error storing analytics: {0}")]
    Store(#[source] sqlx::Error),
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),
    #[error("Classroom not found: {0}")]
    ClassroomNotFound(Uuid),
    #[error("Progress record not found: {0}")]
    ProgressNotFound(Uuid),
    #[error("Insufficient permissions: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

