//! Client-facing error body
//!
//! Built from a job's [`FailureReason`]; carries the metadata the client
//! needs and nothing from engine output.

use serde::Serialize;

use sentinela_core::{ErrorMetadata, FailureReason};

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<&'static str>,
}

impl From<&FailureReason> for ErrorResponse {
    fn from(reason: &FailureReason) -> Self {
        Self {
            error: reason.client_message(),
            code: reason.error_code(),
            recoverable: reason.is_recoverable(),
            suggested_action: reason.suggested_action(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinela_core::JobStatus;

    #[test]
    fn infected_response_hides_threat_names() {
        let reason = FailureReason::Infected {
            threats: vec!["Win.Trojan.Agent-123".to_string()],
        };
        let body = serde_json::to_value(ErrorResponse::from(&reason)).unwrap();

        assert_eq!(body["code"], "INFECTED");
        assert_eq!(body["error"], "file rejected: malware detected");
        assert_eq!(body["recoverable"], false);
        assert!(!body.to_string().contains("Trojan"));
    }

    #[test]
    fn internal_error_is_recoverable() {
        let response = ErrorResponse::from(&FailureReason::InternalError {
            stage: JobStatus::Detecting,
        });

        assert_eq!(response.code, "INTERNAL_ERROR");
        assert!(response.recoverable);
        assert!(response.suggested_action.is_some());
    }
}
