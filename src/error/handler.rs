//! The single entry point for failures raised while serving a request

use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::config::Environment;
use crate::error::classified::{ClassifiedError, ErrorContext};
use crate::error::normalizer::{RaisedFailure, normalize};
use crate::error::response::ErrorResponse;
use crate::error::taxonomy::ErrorSeverity;
use crate::escalation::EscalationBridge;
use crate::logging::{LogLevel, Logger};
use crate::storage::ErrorStore;

/// Request correlation attached to a handled failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub method: Option<String>,
    pub path: Option<String>,
    pub request_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self {
            method: None,
            path: None,
            request_id: Uuid::new_v4().to_string(),
            user_id: None,
            session_id: None,
        }
    }
}

impl RequestMeta {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn to_context(&self) -> ErrorContext {
        let mut context = ErrorContext::new().with("requestId", self.request_id.as_str());
        let optional = [
            ("method", &self.method),
            ("path", &self.path),
            ("userId", &self.user_id),
            ("sessionId", &self.session_id),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                context.insert(key, value.as_str());
            }
        }
        context
    }
}

/// Log level an error of the given severity is recorded at
pub fn log_level_for(severity: ErrorSeverity) -> LogLevel {
    match severity {
        ErrorSeverity::Low => LogLevel::Warn,
        ErrorSeverity::Medium | ErrorSeverity::High => LogLevel::Error,
        ErrorSeverity::Critical => LogLevel::Fatal,
    }
}

/// Normalizes, logs, persists and escalates failures, then shapes the response
#[derive(Clone)]
pub struct ErrorHandler {
    logger: Logger,
    store: Arc<dyn ErrorStore>,
    bridge: Arc<EscalationBridge>,
    environment: Environment,
}

impl ErrorHandler {
    pub fn new(
        logger: Logger,
        store: Arc<dyn ErrorStore>,
        bridge: Arc<EscalationBridge>,
        environment: Environment,
    ) -> Self {
        Self {
            logger,
            store,
            bridge,
            environment,
        }
    }

    /// Handle a raised failure. Never fails: problems inside the pipeline are logged.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn handle(
        &self,
        failure: impl Into<RaisedFailure>,
        request: &RequestMeta,
    ) -> ErrorResponse {
        let error = normalize(failure.into(), Some(request.to_context())).with_correlation(
            Some(&request.request_id),
            request.user_id.as_deref(),
            request.session_id.as_deref(),
        );

        self.record(&error).await;

        if let Err(e) = self.store.save_error(&error.redacted()).await {
            self.logger
                .error("failed to persist error record", failure_context(&error, &e.to_string()))
                .await;
        }

        if error.requires_escalation() {
            if let Err(e) = self.bridge.initiate(error.clone()).await {
                self.logger
                    .error("failed to initiate escalation", failure_context(&error, &e.to_string()))
                    .await;
            }
        }

        ErrorResponse::from_error(&error, self.environment.is_production())
    }

    /// Handle an arbitrary JSON failure payload
    pub async fn handle_json(&self, payload: Value, request: &RequestMeta) -> ErrorResponse {
        self.handle(RaisedFailure::from_json(payload), request).await
    }

    /// Handle any Rust error
    pub async fn handle_error(
        &self,
        error: &(dyn std::error::Error + 'static),
        request: &RequestMeta,
    ) -> ErrorResponse {
        self.handle(RaisedFailure::from_error(error), request).await
    }

    async fn record(&self, error: &ClassifiedError) {
        let mut context = error.context().clone();
        context.insert("errorId", error.id().to_string());
        context.insert("category", error.category().to_string());
        context.insert("severity", error.severity().to_string());
        context.insert("code", error.code());
        context.insert("statusCode", error.status_code());
        context.insert("isOperational", error.is_operational());
        self.logger
            .log(log_level_for(error.severity()), error.message(), context)
            .await;
    }
}

fn failure_context(error: &ClassifiedError, reason: &str) -> ErrorContext {
    ErrorContext::new()
        .with("errorId", error.id().to_string())
        .with("reason", reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(log_level_for(ErrorSeverity::Low), LogLevel::Warn);
        assert_eq!(log_level_for(ErrorSeverity::Medium), LogLevel::Error);
        assert_eq!(log_level_for(ErrorSeverity::High), LogLevel::Error);
        assert_eq!(log_level_for(ErrorSeverity::Critical), LogLevel::Fatal);
    }

    #[test]
    fn test_request_meta_context() {
        let meta = RequestMeta::new("POST", "/api/sessions")
            .with_request_id("req-1")
            .with_user_id("user-1");
        let context = meta.to_context();

        assert_eq!(context.get_str("requestId"), Some("req-1"));
        assert_eq!(context.get_str("method"), Some("POST"));
        assert_eq!(context.get_str("userId"), Some("user-1"));
        assert!(context.get("sessionId").is_none());
    }

    #[test]
    fn test_request_id_is_generated() {
        let a = RequestMeta::default();
        let b = RequestMeta::default();
        assert_ne!(a.request_id, b.request_id);
    }
}
