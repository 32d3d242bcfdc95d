//! The canonical record every failure is normalized into

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::panic::Location;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::taxonomy::{self, ErrorCategory, ErrorSeverity};
use crate::logging::sanitizer;

/// Open key/value bag of diagnostic data attached to an error or log entry.
///
/// Keys are free-form; by convention request correlation uses `requestId`, `userId`,
/// `sessionId`, `method` and `path`, validation failures use `validationErrors`, and
/// privacy violations carry `violationType`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorContext(BTreeMap<String, Value>);

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, replacing any previous value under the same key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Merge `other` into this context; keys in `other` win
    pub fn merge(&mut self, other: ErrorContext) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The context as a JSON object
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    /// Build a context from a JSON value; non-objects land under `value`
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map.into_iter().collect()),
            Value::Null => Self::default(),
            other => Self::default().with("value", other),
        }
    }

    /// A copy with every string redacted and sensitive keys masked
    pub fn sanitized(&self) -> Self {
        match sanitizer::sanitize_value(&self.to_value()) {
            Value::Object(map) => Self(map.into_iter().collect()),
            _ => Self::default(),
        }
    }
}

impl FromIterator<(String, Value)> for ErrorContext {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Canonical, immutable record produced for any failure.
///
/// Fields are private: `is_operational` and `status_code` are derived from category and
/// severity at construction and cannot drift. Only the context, and correlation
/// identifiers that are still missing, can be filled in before handling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    id: Uuid,
    timestamp: DateTime<Utc>,
    category: ErrorCategory,
    severity: ErrorSeverity,
    status_code: u16,
    is_operational: bool,
    code: String,
    message: String,
    context: ErrorContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack_trace: Option<String>,
}

impl ClassifiedError {
    /// Start building an error of the given category
    pub fn builder(category: ErrorCategory, message: impl Into<String>) -> ClassifiedErrorBuilder {
        ClassifiedErrorBuilder::new(category, message)
    }

    /// Create an error with the category's default severity
    #[track_caller]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::builder(category, message).build()
    }

    #[track_caller]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    #[track_caller]
    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Security, message)
    }

    #[track_caller]
    pub fn privacy_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::PrivacyViolation, message)
    }

    #[track_caller]
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::System, message)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn is_operational(&self) -> bool {
        self.is_operational
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Whether handling this error must go through escalation
    pub fn requires_escalation(&self) -> bool {
        taxonomy::is_security_relevant(self.category)
            || self.severity == ErrorSeverity::Critical
            || !self.is_operational
    }

    /// Merge extra diagnostic context; existing keys are overwritten
    pub fn merge_context(mut self, context: ErrorContext) -> Self {
        self.context.merge(context);
        self
    }

    /// Fill correlation identifiers that are not set yet
    pub fn with_correlation(
        mut self,
        request_id: Option<&str>,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Self {
        fill(&mut self.request_id, request_id);
        fill(&mut self.user_id, user_id);
        fill(&mut self.session_id, session_id);
        self
    }

    /// A copy safe to persist: message and context redacted
    pub fn redacted(&self) -> Self {
        Self {
            message: sanitizer::sanitize(&self.message),
            context: self.context.sanitized(),
            ..self.clone()
        }
    }

    /// The same record without its stack trace
    pub fn without_stack_trace(mut self) -> Self {
        self.stack_trace = None;
        self
    }
}

fn fill(slot: &mut Option<String>, value: Option<&str>) {
    if slot.is_none() {
        *slot = value.map(str::to_string);
    }
}

/// Builder for [`ClassifiedError`]
#[derive(Debug, Clone)]
pub struct ClassifiedErrorBuilder {
    category: ErrorCategory,
    message: String,
    severity: Option<ErrorSeverity>,
    code: Option<String>,
    context: ErrorContext,
    id: Option<Uuid>,
    timestamp: Option<DateTime<Utc>>,
    user_id: Option<String>,
    session_id: Option<String>,
    request_id: Option<String>,
}

impl ClassifiedErrorBuilder {
    fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            severity: None,
            code: None,
            context: ErrorContext::new(),
            id: None,
            timestamp: None,
            user_id: None,
            session_id: None,
            request_id: None,
        }
    }

    /// Override the category's default severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Override the category's machine code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add a context value
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key, value);
        self
    }

    /// Merge a whole context map
    pub fn with_context_map(mut self, context: ErrorContext) -> Self {
        self.context.merge(context);
        self
    }

    /// Keep an identifier assigned elsewhere (e.g. a record re-entering the pipeline)
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
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

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Finish the record, deriving status and operational flag and capturing the trace
    #[track_caller]
    pub fn build(self) -> ClassifiedError {
        let severity = self.severity.unwrap_or_else(|| self.category.default_severity());
        ClassifiedError {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            category: self.category,
            severity,
            status_code: taxonomy::status_code_for(self.category, severity),
            is_operational: taxonomy::is_operational(self.category, severity),
            code: self.code.unwrap_or_else(|| self.category.code().to_string()),
            message: self.message,
            context: self.context,
            user_id: self.user_id,
            session_id: self.session_id,
            request_id: self.request_id,
            stack_trace: Some(capture_stack_trace()),
        }
    }
}

#[track_caller]
fn capture_stack_trace() -> String {
    let location = Location::caller();
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => {
            format!("at {}:{}\n{}", location.file(), location.line(), backtrace)
        }
        _ => format!("at {}:{}", location.file(), location.line()),
    }
}
