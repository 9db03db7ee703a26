use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServingError {
    #[error("{message}")]
    Validation { message: String },
    #[error("Unknown model: {name}")]
    UnknownModel { name: String },
    #[error("Invalid value for {field}: {value}")]
    InvalidCategory { field: String, value: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("service unavailable: {message}")]
    Unavailable { message: String },
    #[error("inference error: {message}")]
    Inference { message: String },
    #[error("inference timed out after {millis} ms")]
    Timeout { millis: u64 },
    #[error("artifact error: {message}")]
    Artifact { message: String },
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ServingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel { name: name.into() }
    }

    pub fn invalid_category(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidCategory {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
        }
    }

    pub fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Client-side faults: the request itself is wrong and retrying it cannot help.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::UnknownModel { .. }
                | Self::InvalidCategory { .. }
                | Self::NotFound { .. }
        )
    }
}

pub type ServingResult<T> = Result<T, ServingError>;

impl From<sea_orm::DbErr> for ServingError {
    fn from(value: sea_orm::DbErr) -> Self {
        match value {
            sea_orm::DbErr::ConnectionAcquire(err) => ServingError::unavailable(err.to_string()),
            other => ServingError::storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServingError {
    fn from(value: serde_json::Error) -> Self {
        ServingError::artifact(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::ServingError;

    #[test]
    fn helper_constructors_set_variants() {
        assert!(matches!(
            ServingError::validation("bad"),
            ServingError::Validation { .. }
        ));
        assert!(matches!(
            ServingError::unknown_model("x"),
            ServingError::UnknownModel { .. }
        ));
        assert!(matches!(
            ServingError::invalid_category("f", "v"),
            ServingError::InvalidCategory { .. }
        ));
        assert!(matches!(
            ServingError::not_found("missing"),
            ServingError::NotFound { .. }
        ));
        assert!(matches!(
            ServingError::storage("disk"),
            ServingError::Storage { .. }
        ));
        assert!(matches!(
            ServingError::unavailable("pool"),
            ServingError::Unavailable { .. }
        ));
    }

    #[test]
    fn unknown_model_message_names_the_model() {
        let err = ServingError::unknown_model("unknown_model_name");
        assert_eq!(err.to_string(), "Unknown model: unknown_model_name");
        assert!(err.is_client_error());
    }

    #[test]
    fn storage_failures_are_server_errors() {
        assert!(!ServingError::storage("commit failed").is_client_error());
        assert!(!ServingError::Timeout { millis: 10 }.is_client_error());
    }

    #[test]
    fn pool_acquire_timeout_maps_to_unavailable() {
        let err: ServingError =
            sea_orm::DbErr::ConnectionAcquire(sea_orm::ConnAcquireErr::Timeout).into();
        assert!(matches!(err, ServingError::Unavailable { .. }));
    }
}
