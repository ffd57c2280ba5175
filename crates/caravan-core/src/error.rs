use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaravanError {
    #[error("not initialized: run 'caravan init'")]
    NotInitialized,

    #[error("instance not found in caravan.yaml: {0}")]
    InstanceNotFound(String),

    #[error("feature not found: {0}")]
    FeatureNotFound(String),

    #[error("feature already exists: {0}")]
    FeatureExists(String),

    #[error("dependency cycle involving feature '{0}'")]
    DependencyCycle(String),

    #[error("missing required variable '{var}' for feature '{feature}' and no recorded value to fall back on")]
    MissingVariable { var: String, feature: String },

    #[error("invalid name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidName(String),

    #[error("invalid exclusion pattern '{0}': {1}")]
    InvalidPattern(String, String),

    #[error("lifecycle module '{module}' referenced by {marker} is not registered")]
    UnknownModule { module: String, marker: String },

    #[error("bootstrap failed for module '{module}': {source}")]
    Bootstrap {
        module: String,
        #[source]
        source: Box<CaravanError>,
    },

    #[error("migration '{unit}' failed: {source}")]
    Migration {
        unit: String,
        #[source]
        source: Box<CaravanError>,
    },

    #[error("invalid migration script '{unit}': {reason}")]
    InvalidScript { unit: String, reason: String },

    #[error("state store error: {0}")]
    Store(String),

    #[error("instance request failed: {0}")]
    Client(#[from] ClientError),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("{0}")]
    Hook(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Remote instance request failure. `NotFound` is its own variant so unit
/// scripts and hooks can branch on create-vs-update without string matching.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("remote returned {status} for {path}: {body}")]
    Remote {
        status: u16,
        path: String,
        body: String,
    },

    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CaravanError>;

impl CaravanError {
    /// True when the error was raised before any remote call could be made
    /// (configuration and dependency problems).
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            CaravanError::FeatureNotFound(_)
                | CaravanError::DependencyCycle(_)
                | CaravanError::MissingVariable { .. }
                | CaravanError::InvalidPattern(..)
                | CaravanError::UnknownModule { .. }
        )
    }
}
