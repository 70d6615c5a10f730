use thiserror::Error;

#[derive(Error, Debug)]
pub enum BloodSearchError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Geocoding provider error: {message}")]
    ProviderError { message: String },

    #[error("No geocoding result for '{query}'")]
    NoResult { query: String },

    #[error("Storage error: {0}")]
    StorageError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Notification error: {message}")]
    NotificationError { message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Donor balances for branch {branch_id} changed during allocation")]
    ConcurrentModification { branch_id: i64 },

    #[error("No transition from state {state} on {outcome}")]
    InvalidTransition { state: String, outcome: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Geocoding,
    Storage,
    Messaging,
    Notification,
    Configuration,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BloodSearchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput { .. } => ErrorCategory::Input,
            Self::ProviderError { .. } | Self::NoResult { .. } => ErrorCategory::Geocoding,
            Self::StorageError(_) | Self::MigrationError(_) | Self::ConcurrentModification { .. } => {
                ErrorCategory::Storage
            }
            Self::QueueError { .. } => ErrorCategory::Messaging,
            Self::NotificationError { .. } => ErrorCategory::Notification,
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            Self::Timeout { .. }
            | Self::InvalidTransition { .. }
            | Self::SerializationError(_)
            | Self::IoError(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotificationError { .. } | Self::NoResult { .. } => ErrorSeverity::Low,
            Self::InvalidInput { .. }
            | Self::ProviderError { .. }
            | Self::Timeout { .. }
            | Self::ConcurrentModification { .. } => ErrorSeverity::Medium,
            Self::SerializationError(_) | Self::InvalidTransition { .. } => ErrorSeverity::High,
            Self::StorageError(_)
            | Self::MigrationError(_)
            | Self::QueueError { .. }
            | Self::IoError(_)
            | Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorSeverity::Critical,
        }
    }

    /// Errors worth another attempt on the next scheduled run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderError { .. }
                | Self::Timeout { .. }
                | Self::ConcurrentModification { .. }
                | Self::QueueError { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Input => "Check the city, district and units in the request payload",
            ErrorCategory::Geocoding => "Check the geocoder endpoint, API key and quota",
            ErrorCategory::Storage => "Check the database URL and that migrations have been applied",
            ErrorCategory::Messaging => "Check that the AMQP broker is reachable and the queue exists",
            ErrorCategory::Notification => "Check the notification API key and sender address",
            ErrorCategory::Configuration => "Fix the configuration file and restart the service",
            ErrorCategory::Internal => "Re-run with --verbose and inspect the logs",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Storage => format!("Blood inventory database unavailable: {}", self),
            ErrorCategory::Messaging => format!("Request queue unavailable: {}", self),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BloodSearchError>;
