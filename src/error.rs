use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Application not found")]
    SubjectNotFound,

    #[error("Cross-organization access is forbidden")]
    CrossTenantAccess,

    #[error("Application is already closed")]
    AlreadyClosed,

    #[error("Invalid stage transition {from} -> {to}")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    #[error("Self-approval is forbidden")]
    SelfApprovalForbidden,

    #[error("A pending approval already exists for this subject and target")]
    PendingConflict,

    #[error("created_at override is not allowed in prod")]
    TimestampOverrideForbidden,

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Missing required scope: {0}")]
    MissingScope(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Config version not found: {0}")]
    ConfigVersionNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
