//! Client-facing error response

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::classified::ClassifiedError;
use crate::error::taxonomy::{ErrorCategory, ErrorSeverity};
use crate::logging::sanitizer;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub id: Uuid,
    pub code: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
    pub meta: ResponseMeta,
}

/// Status code plus JSON body returned for a handled failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: u16,
    #[serde(flatten)]
    pub body: ErrorBody,
}

impl ErrorResponse {
    /// Build the response for `error`.
    ///
    /// The message is always redacted. Production-like responses carry neither details nor
    /// a stack trace, and server errors get the category's generic message.
    pub fn from_error(error: &ClassifiedError, production: bool) -> Self {
        let status = error.status_code();
        let message = if production && status >= 500 {
            error.category().profile().client_message.to_string()
        } else {
            sanitizer::sanitize(error.message())
        };

        let (details, stack_trace) = if production {
            (None, None)
        } else {
            let details =
                (!error.context().is_empty()).then(|| error.context().sanitized().to_value());
            (details, error.stack_trace().map(sanitizer::sanitize))
        };

        Self {
            status,
            body: ErrorBody {
                error: ErrorPayload {
                    id: error.id(),
                    code: error.code().to_string(),
                    message,
                    category: error.category(),
                    severity: error.severity(),
                    timestamp: error.timestamp(),
                    details,
                    stack_trace,
                },
                meta: ResponseMeta {
                    request_id: error.request_id().map(str::to_string),
                    session_id: error.session_id().map(str::to_string),
                    user_id: error.user_id().map(str::to_string),
                },
            },
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.body).unwrap_or(Value::Null)
    }
}
