// ============================================================================
// ERRORS - Ledger, mutation, and HTTP boundary
// ============================================================================

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Failures talking to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Node unreachable or temporarily unavailable. Safe to retry.
    #[error("Ledger connection error: {0}")]
    Connection(String),

    /// Node or contract refused the call. Retrying the same call will fail again.
    #[error("Ledger rejected the operation: {0}")]
    Rejected(String),

    /// Confirmation wait ran out. The operation may still be included later.
    #[error("Operation {operation_id} was not confirmed within {waited:?}; it may still be included later")]
    Timeout { operation_id: String, waited: Duration },

    /// Credential import or signing failed.
    #[error("Signing error: {0}")]
    Signing(String),
}

impl LedgerError {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Connection(_) => "ConnectionError",
            LedgerError::Rejected(_) => "RejectedError",
            LedgerError::Timeout { .. } => "TimeoutError",
            LedgerError::Signing(_) => "SigningError",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Connection(_))
    }

    /// True when the caller cannot tell whether the operation happened.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, LedgerError::Timeout { .. })
    }
}

/// Failures of a credit/debit request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient balance: {available} < {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The mutation task was stopped before it finished, usually at shutdown.
    /// The operation may or may not have been broadcast.
    #[error("Mutation interrupted: {0}")]
    Interrupted(String),
}

impl MutationError {
    pub fn kind(&self) -> &'static str {
        match self {
            MutationError::Validation(_) => "ValidationError",
            MutationError::InsufficientBalance { .. } => "InsufficientBalanceError",
            MutationError::Ledger(e) => e.kind(),
            MutationError::Interrupted(_) => "InterruptedError",
        }
    }
}

// ============================================================================
// HTTP BOUNDARY
// ============================================================================

/// Error returned by request handlers. Rendered as
/// `{ success: "false", errMessage, err }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
    pub outcome_unknown: bool,
    pub details: Value,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "ValidationError",
            message: message.into(),
            retryable: false,
            outcome_unknown: false,
            details: Value::Null,
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "NotFound",
            message: format!("Not Found: {}", path),
            retryable: false,
            outcome_unknown: false,
            details: Value::Null,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let status = match &e {
            LedgerError::Connection(_) => StatusCode::BAD_GATEWAY,
            LedgerError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            LedgerError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let details = match &e {
            LedgerError::Timeout { operation_id, waited } => json!({
                "operationId": operation_id,
                "waitedMs": waited.as_millis() as u64,
            }),
            _ => Value::Null,
        };
        Self {
            status,
            kind: e.kind(),
            message: e.to_string(),
            retryable: e.is_retryable(),
            outcome_unknown: e.outcome_unknown(),
            details,
        }
    }
}

impl From<MutationError> for ApiError {
    fn from(e: MutationError) -> Self {
        match e {
            MutationError::Ledger(inner) => inner.into(),
            MutationError::Validation(_) => ApiError::validation(e.to_string()),
            MutationError::InsufficientBalance { available, requested } => Self {
                status: StatusCode::BAD_REQUEST,
                kind: e.kind(),
                message: e.to_string(),
                retryable: false,
                outcome_unknown: false,
                details: json!({ "available": available, "requested": requested }),
            },
            MutationError::Interrupted(_) => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                kind: e.kind(),
                message: e.to_string(),
                retryable: false,
                outcome_unknown: true,
                details: Value::Null,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut err = json!({
            "kind": self.kind,
            "retryable": self.retryable,
            "outcomeUnknown": self.outcome_unknown,
        });
        if let (Value::Object(target), Value::Object(extra)) = (&mut err, self.details) {
            target.extend(extra);
        }
        let body = json!({
            "success": "false",
            "errMessage": self.message,
            "err": err,
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        let cases = [
            (LedgerError::Connection("down".into()), StatusCode::BAD_GATEWAY),
            (LedgerError::Rejected("BMT_NotAdmin".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                LedgerError::Timeout { operation_id: "oo1".into(), waited: Duration::from_secs(3) },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (LedgerError::Signing("bad key".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }

        let validation: ApiError = MutationError::Validation("amount".into()).into();
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_timeout_is_flagged_outcome_unknown() {
        let api: ApiError = MutationError::Ledger(LedgerError::Timeout {
            operation_id: "ooTimeout".into(),
            waited: Duration::from_millis(1500),
        })
        .into();
        assert!(api.outcome_unknown);
        assert!(!api.retryable);
        assert_eq!(api.details["operationId"], "ooTimeout");
        assert_eq!(api.details["waitedMs"], 1500);
    }

    #[test]
    fn test_interrupted_mutation_is_outcome_unknown() {
        let api: ApiError = MutationError::Interrupted("task cancelled".into()).into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.kind, "InterruptedError");
        assert!(api.outcome_unknown);
    }

    #[test]
    fn test_only_connection_errors_are_retryable() {
        assert!(LedgerError::Connection("x".into()).is_retryable());
        assert!(!LedgerError::Rejected("x".into()).is_retryable());
        assert!(!LedgerError::Signing("x".into()).is_retryable());
    }
}
