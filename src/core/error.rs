

use thiserror::Error;


#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid deletion rule on {model}.{field}: {reason}")]
    InvalidRule {
        model: String,
        field: String,
        reason: String,
    },

    #[error("Model not registered: {0}")]
    UnknownModel(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Transaction timed out after {0}ms")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Job not found: {0}")]
    UnknownJob(String),

    #[error("Invalid job input: {0}")]
    InvalidJobInput(String),

    #[error("Job {job_id} blocked by failed dependencies: {}", dependencies.join(", "))]
    DependencyFailed {
        job_id: String,
        dependencies: Vec<String>,
    },

    #[error("Not permitted in dry run: {0}")]
    DryRunMisuse(String),

    #[error("External resource error: {0}")]
    External(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config loading error: {0}")]
    Config(#[from] config::ConfigError),
}

impl CascadeError {
    pub fn invalid_rule(
        model: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidRule {
            model: model.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }


    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InvalidRule { .. } | Self::UnknownModel(_) | Self::Config(_)
        )
    }
}


pub type Result<T> = std::result::Result<T, CascadeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CascadeError::Conflict("Post(1)".into()).is_transient());
        assert!(!CascadeError::Timeout(50).is_transient());
        assert!(!CascadeError::NotFound("Post(1)".into()).is_transient());
    }

    #[test]
    fn test_dependency_failed_message() {
        let err = CascadeError::DependencyFailed {
            job_id: "j3".into(),
            dependencies: vec!["j1".into(), "j2".into()],
        };
        assert_eq!(
            err.to_string(),
            "Job j3 blocked by failed dependencies: j1, j2"
        );
    }

    #[test]
    fn test_configuration_classification() {
        assert!(CascadeError::invalid_rule("Post", "author", "not a reference").is_configuration());
        assert!(CascadeError::UnknownModel("Ghost".into()).is_configuration());
        assert!(!CascadeError::DryRunMisuse("startExternalDeletion".into()).is_configuration());
    }
}
