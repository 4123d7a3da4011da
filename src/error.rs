//! Error taxonomy for the twin
//!
//! Collaborator plumbing uses `anyhow`; these variants classify what went
//! wrong so the orchestrator can decide between aborting (validation) and
//! degrading a single response field (provider, data integrity).

/// Classified failures
#[derive(Debug, thiserror::Error)]
pub enum TwinError {
    /// Missing or invalid required input. Fatal for the query.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A collaborator (context, personality, patterns, text generation) failed.
    /// Recovered locally with a documented default.
    #[error("{step} provider failed: {message}")]
    Provider { step: String, message: String },

    /// A payload field was missing or had the wrong shape. Defaulted.
    #[error("malformed field '{field}' in event {event_id}: {message}")]
    DataIntegrity {
        event_id: String,
        field: String,
        message: String,
    },
}

impl TwinError {
    pub fn validation(message: impl Into<String>) -> Self {
        TwinError::Validation(message.into())
    }

    pub fn provider(step: &str, err: &anyhow::Error) -> Self {
        TwinError::Provider {
            step: step.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn data_integrity(event_id: &str, field: &str, message: impl Into<String>) -> Self {
        TwinError::DataIntegrity {
            event_id: event_id.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the query pipeline
    pub fn is_fatal(&self) -> bool {
        matches!(self, TwinError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_validation_is_fatal() {
        assert!(TwinError::validation("missing user id").is_fatal());
        let err = anyhow::anyhow!("connection refused");
        assert!(!TwinError::provider("context", &err).is_fatal());
        assert!(!TwinError::data_integrity("e1", "actionType", "not a string").is_fatal());
    }

    #[test]
    fn test_provider_message_includes_step() {
        let err = anyhow::anyhow!("timeout");
        let msg = TwinError::provider("text_generation", &err).to_string();
        assert_eq!(msg, "text_generation provider failed: timeout");
    }
}
