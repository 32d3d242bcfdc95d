//! Conversion of arbitrary raised failures into [`ClassifiedError`]

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::error::classified::{ClassifiedError, ErrorContext};
use crate::error::taxonomy::{self, ErrorCategory, ErrorSeverity};
use crate::logging::sanitizer;

/// One failed field of a schema validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(default)]
    pub path: Vec<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: vec![path.into()],
            message: message.into(),
            code: None,
        }
    }
}

/// Anything the surrounding application can raise
#[derive(Debug, Clone)]
pub enum RaisedFailure {
    /// Already in canonical shape
    Classified(ClassifiedError),
    /// Storage driver failure carrying a driver error code
    Driver { code: String, message: String },
    /// Schema validation failure
    Validation { issues: Vec<ValidationIssue> },
    /// Ordinary error with a name and a message
    Generic { name: String, message: String },
    /// Anything else
    Unknown(Value),
}

struct DriverCode {
    codes: &'static [&'static str],
    message: &'static str,
    severity: ErrorSeverity,
}

/// Prisma-style codes, SQLite extended result codes and Postgres SQLSTATEs
static DRIVER_CODES: &[DriverCode] = &[
    DriverCode {
        codes: &["P2002", "2067", "1555", "23505"],
        message: "Unique constraint violation",
        severity: ErrorSeverity::Medium,
    },
    DriverCode {
        codes: &["P2003", "787", "23503"],
        message: "Foreign key constraint violation",
        severity: ErrorSeverity::Medium,
    },
    DriverCode {
        codes: &["P2011", "1299", "23502"],
        message: "Required value missing",
        severity: ErrorSeverity::Medium,
    },
    DriverCode {
        codes: &["P2025"],
        message: "Record to update not found",
        severity: ErrorSeverity::Medium,
    },
    DriverCode {
        codes: &["P1001", "P1017", "14", "08001", "08006", "CONNECTION_FAILED", "POOL_CLOSED"],
        message: "Database server unreachable",
        severity: ErrorSeverity::High,
    },
    DriverCode {
        codes: &["P1008", "P2024", "5", "517", "57014", "POOL_TIMEOUT"],
        message: "Database operation timed out",
        severity: ErrorSeverity::High,
    },
    DriverCode {
        codes: &["P1003", "P2021", "P2022", "42P01", "42703", "3F000", "SCHEMA_MISSING"],
        message: "Database schema is missing a table or column",
        severity: ErrorSeverity::Critical,
    },
];

const UNMAPPED_DRIVER_MESSAGE: &str = "Database operation failed";
const UNKNOWN_MESSAGE: &str = "An unknown error occurred";
const MAX_CODE_LEN: usize = 64;

fn lookup_driver_code(code: &str) -> Option<&'static DriverCode> {
    DRIVER_CODES.iter().find(|entry| entry.codes.contains(&code))
}

impl RaisedFailure {
    /// Inspect an arbitrary JSON payload and pick the most specific shape it matches
    pub fn from_json(value: Value) -> Self {
        let map = match value {
            Value::Object(map) => map,
            Value::String(message) => {
                return Self::Generic {
                    name: "Error".to_string(),
                    message,
                };
            }
            other => return Self::Unknown(other),
        };

        if let Some(error) = classified_from_map(&map) {
            return Self::Classified(error);
        }
        if let Some(code) = driver_code_of(&map) {
            return Self::Driver {
                code,
                message: str_field(&map, "message").unwrap_or_default().to_string(),
            };
        }
        if let Some(issues) = validation_issues_of(&map) {
            return Self::Validation { issues };
        }
        match str_field(&map, "message") {
            Some(message) => Self::Generic {
                name: str_field(&map, "name")
                    .or_else(|| str_field(&map, "type"))
                    .unwrap_or("Error")
                    .to_string(),
                message: message.to_string(),
            },
            None => Self::Unknown(Value::Object(map)),
        }
    }

    /// Wrap any error, recognizing database failures behind it
    pub fn from_error(error: &(dyn StdError + 'static)) -> Self {
        if let Some(sqlx_error) = error.downcast_ref::<sqlx::Error>() {
            return driver_failure(sqlx_error);
        }
        if let Some(AppError::SqlxError(sqlx_error)) = error.downcast_ref::<AppError>() {
            return driver_failure(sqlx_error);
        }

        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Generic {
            name: "Error".to_string(),
            message,
        }
    }
}

impl From<ClassifiedError> for RaisedFailure {
    fn from(error: ClassifiedError) -> Self {
        Self::Classified(error)
    }
}

impl From<sqlx::Error> for RaisedFailure {
    fn from(error: sqlx::Error) -> Self {
        driver_failure(&error)
    }
}

impl From<Value> for RaisedFailure {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

fn driver_failure(error: &sqlx::Error) -> RaisedFailure {
    let (code, message) = match error {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            let code = match db.code() {
                Some(code) if lookup_driver_code(&code).is_some() => code.into_owned(),
                _ if is_missing_schema_message(&message) => "SCHEMA_MISSING".to_string(),
                Some(code) => code.into_owned(),
                None => String::new(),
            };
            (code, message)
        }
        sqlx::Error::RowNotFound => {
            let error = ClassifiedError::new(ErrorCategory::NotFound, "Record not found");
            return RaisedFailure::Classified(error);
        }
        sqlx::Error::PoolTimedOut => ("POOL_TIMEOUT".to_string(), error.to_string()),
        sqlx::Error::PoolClosed => ("POOL_CLOSED".to_string(), error.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            ("CONNECTION_FAILED".to_string(), error.to_string())
        }
        other => (String::new(), other.to_string()),
    };
    RaisedFailure::Driver { code, message }
}

fn is_missing_schema_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("no such table") || message.contains("no such column")
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Canonical payloads carry a category, a message and at least one canonical marker
fn classified_from_map(map: &Map<String, Value>) -> Option<ClassifiedError> {
    let category = str_field(map, "category")?;
    let message = str_field(map, "message")?;
    let is_canonical = ["severity", "statusCode", "id"]
        .iter()
        .any(|marker| map.contains_key(*marker));
    if !is_canonical {
        return None;
    }

    let classification = taxonomy::classify(category);
    let mut builder = ClassifiedError::builder(classification.category, message);
    if let Some(severity) = str_field(map, "severity").and_then(ErrorSeverity::parse) {
        builder = builder.with_severity(severity);
    }
    if let Some(code) = str_field(map, "code").filter(|code| is_safe_code(code)) {
        builder = builder.with_code(code);
    }
    if let Some(id) = str_field(map, "id").and_then(|id| Uuid::parse_str(id).ok()) {
        builder = builder.with_id(id);
    }
    if let Some(timestamp) = str_field(map, "timestamp")
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
    {
        builder = builder.with_timestamp(timestamp.with_timezone(&chrono::Utc));
    }
    if let Some(context) = map.get("context") {
        builder = builder.with_context_map(ErrorContext::from_value(context.clone()));
    }
    if let Some(user_id) = str_field(map, "userId") {
        builder = builder.with_user_id(user_id);
    }
    if let Some(session_id) = str_field(map, "sessionId") {
        builder = builder.with_session_id(session_id);
    }
    if let Some(request_id) = str_field(map, "requestId") {
        builder = builder.with_request_id(request_id);
    }
    Some(builder.build())
}

/// Machine codes travel to clients and incident titles, so only short identifiers
/// that the sanitizer leaves alone are kept
fn is_safe_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && sanitizer::sanitize(code) == code
}

fn driver_code_of(map: &Map<String, Value>) -> Option<String> {
    let code = match map.get("code")? {
        Value::String(code) => code.clone(),
        Value::Number(code) => code.to_string(),
        _ => return None,
    };
    let named_driver = str_field(map, "name").is_some_and(|name| {
        let name = name.to_ascii_lowercase();
        name.contains("prisma") || name.contains("database") || name.contains("sql")
    });
    let prisma_shaped =
        code.len() == 5 && code.starts_with('P') && code[1..].chars().all(|c| c.is_ascii_digit());

    (named_driver || prisma_shaped || lookup_driver_code(&code).is_some()).then_some(code)
}

fn validation_issues_of(map: &Map<String, Value>) -> Option<Vec<ValidationIssue>> {
    let named_validation = str_field(map, "name")
        .is_some_and(|name| name.to_ascii_lowercase().contains("validation") || name == "ZodError");
    let issues = map
        .get("issues")
        .or_else(|| named_validation.then(|| map.get("errors")).flatten());

    match issues {
        Some(Value::Array(items)) => Some(items.iter().map(issue_from_value).collect()),
        _ if named_validation => Some(Vec::new()),
        _ => None,
    }
}

fn issue_from_value(value: &Value) -> ValidationIssue {
    let path = match value.get("path") {
        Some(Value::Array(segments)) => segments
            .iter()
            .map(|segment| match segment {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(path)) => path.split('.').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());
    ValidationIssue {
        path,
        message,
        code: value.get("code").and_then(Value::as_str).map(str::to_string),
    }
}

/// Normalize any raised failure into a classified error; never fails
#[track_caller]
pub fn normalize(failure: RaisedFailure, context: Option<ErrorContext>) -> ClassifiedError {
    let context = context.unwrap_or_default();
    match failure {
        RaisedFailure::Classified(error) => error.merge_context(context),
        RaisedFailure::Driver { code, message } => {
            let (canonical, severity) = match lookup_driver_code(&code) {
                Some(entry) => (entry.message, entry.severity),
                None => (UNMAPPED_DRIVER_MESSAGE, ErrorSeverity::High),
            };
            let mut builder = ClassifiedError::builder(ErrorCategory::Database, canonical)
                .with_severity(severity)
                .with_context_map(context);
            if !code.is_empty() {
                builder = builder.with_context("driverCode", code);
            }
            if !message.is_empty() {
                builder = builder.with_context("driverMessage", message);
            }
            builder.build()
        }
        RaisedFailure::Validation { issues } => {
            let issues = serde_json::to_value(&issues).unwrap_or(Value::Array(Vec::new()));
            ClassifiedError::builder(ErrorCategory::Validation, "Validation failed")
                .with_context_map(context)
                .with_context("validationErrors", issues)
                .build()
        }
        RaisedFailure::Generic { name, message } => generic(&name, message, context),
        RaisedFailure::Unknown(value) => {
            let message = match &value {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::Object(map) => str_field(map, "message")
                    .or_else(|| str_field(map, "error"))
                    .unwrap_or(UNKNOWN_MESSAGE)
                    .to_string(),
                _ => UNKNOWN_MESSAGE.to_string(),
            };
            let mut context = context;
            if !value.is_null() {
                context.insert("rawError", value);
            }
            generic("UnknownError", message, context)
        }
    }
}

#[track_caller]
fn generic(name: &str, message: String, context: ErrorContext) -> ClassifiedError {
    let message = if message.trim().is_empty() { UNKNOWN_MESSAGE.to_string() } else { message };
    ClassifiedError::builder(ErrorCategory::System, message)
        .with_severity(ErrorSeverity::High)
        .with_context_map(context)
        .with_context("errorName", name)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unique_violation_is_medium_database_error() {
        let error = normalize(
            RaisedFailure::Driver {
                code: "P2002".into(),
                message: "Unique constraint failed on the fields: (`email`)".into(),
            },
            None,
        );
        assert_eq!(error.category(), ErrorCategory::Database);
        assert_eq!(error.severity(), ErrorSeverity::Medium);
        assert_eq!(error.message(), "Unique constraint violation");
        assert_eq!(error.status_code(), 500);
        assert!(!error.requires_escalation());
    }

    #[test]
    fn test_driver_code_severities() {
        let severity = |code: &str| {
            let failure = RaisedFailure::Driver { code: code.into(), message: String::new() };
            normalize(failure, None).severity()
        };
        assert_eq!(severity("2067"), ErrorSeverity::Medium);
        assert_eq!(severity("23503"), ErrorSeverity::Medium);
        assert_eq!(severity("POOL_TIMEOUT"), ErrorSeverity::High);
        assert_eq!(severity("P1001"), ErrorSeverity::High);
        assert_eq!(severity("42P01"), ErrorSeverity::Critical);
    }

    #[tokio::test]
    async fn test_sqlite_driver_errors_are_classified() {
        let pool = crate::storage::db::DatabaseManager::setup_test_db().await.pool;
        sqlx::query("CREATE TABLE patients (email TEXT NOT NULL UNIQUE)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO patients (email) VALUES ('pat@example.org')")
            .execute(&pool)
            .await
            .unwrap();

        let duplicate = sqlx::query("INSERT INTO patients (email) VALUES ('pat@example.org')")
            .execute(&pool)
            .await
            .unwrap_err();
        let error = normalize(duplicate.into(), None);
        assert_eq!(error.category(), ErrorCategory::Database);
        assert_eq!(error.severity(), ErrorSeverity::Medium);
        assert_eq!(error.message(), "Unique constraint violation");
        assert_eq!(error.context().get_str("driverCode"), Some("2067"));

        let missing_value = sqlx::query("INSERT INTO patients (email) VALUES (NULL)")
            .execute(&pool)
            .await
            .unwrap_err();
        let error = normalize(missing_value.into(), None);
        assert_eq!(error.severity(), ErrorSeverity::Medium);
        assert_eq!(error.message(), "Required value missing");

        let missing_table = sqlx::query("SELECT * FROM appointments")
            .fetch_all(&pool)
            .await
            .err()
            .unwrap();
        let error = normalize(missing_table.into(), None);
        assert_eq!(error.category(), ErrorCategory::Database);
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert_eq!(error.message(), "Database schema is missing a table or column");
        assert_eq!(error.context().get_str("driverCode"), Some("SCHEMA_MISSING"));
        assert!(error.requires_escalation());
    }

    #[test]
    fn test_unmapped_driver_code() {
        let failure = RaisedFailure::Driver { code: "P9999".into(), message: "weird".into() };
        let error = normalize(failure, None);
        assert_eq!(error.message(), "Database operation failed");
        assert_eq!(error.severity(), ErrorSeverity::High);
        assert_eq!(error.context().get_str("driverCode"), Some("P9999"));
    }

    #[test]
    fn test_validation_failure() {
        let error = normalize(
            RaisedFailure::Validation { issues: vec![ValidationIssue::new("email", "Required")] },
            Some(ErrorContext::new().with("path", "/signup")),
        );
        assert_eq!(error.category(), ErrorCategory::Validation);
        assert_eq!(error.severity(), ErrorSeverity::Low);
        assert_eq!(error.status_code(), 400);
        assert_eq!(
            error.context().get("validationErrors"),
            Some(&json!([{"path": ["email"], "message": "Required"}]))
        );
        assert_eq!(error.context().get_str("path"), Some("/signup"));
    }

    #[test]
    fn test_generic_failure_is_operational_system_error() {
        let failure = RaisedFailure::Generic {
            name: "TypeError".into(),
            message: "x is undefined".into(),
        };
        let error = normalize(failure, None);
        assert_eq!(error.category(), ErrorCategory::System);
        assert_eq!(error.severity(), ErrorSeverity::High);
        assert_eq!(error.status_code(), 500);
        assert!(error.is_operational());
        assert_eq!(error.context().get_str("errorName"), Some("TypeError"));
    }

    #[test]
    fn test_classified_passes_through_with_context() {
        let original = ClassifiedError::privacy_violation("Unauthorized PHI access");
        let id = original.id();
        let error = normalize(original.into(), Some(ErrorContext::new().with("requestId", "r-1")));
        assert_eq!(error.id(), id);
        assert_eq!(error.category(), ErrorCategory::PrivacyViolation);
        assert_eq!(error.context().get_str("requestId"), Some("r-1"));
    }

    #[test]
    fn test_from_json_shapes() {
        let driver = json!({
            "name": "PrismaClientKnownRequestError",
            "code": "P2002",
            "message": "dup"
        });
        assert!(matches!(RaisedFailure::from_json(driver), RaisedFailure::Driver { .. }));

        let validation = json!({
            "name": "ZodError",
            "issues": [{"path": ["age"], "message": "Expected number"}]
        });
        assert!(matches!(
            RaisedFailure::from_json(validation),
            RaisedFailure::Validation { ref issues }
                if issues.len() == 1 && issues[0].path == vec!["age"]
        ));

        let canonical = json!({
            "category": "privacy-violation",
            "severity": "critical",
            "message": "PHI"
        });
        assert!(matches!(
            RaisedFailure::from_json(canonical),
            RaisedFailure::Classified(ref e) if e.category() == ErrorCategory::PrivacyViolation
        ));
        assert!(matches!(
            RaisedFailure::from_json(json!({"name": "RangeError", "message": "too big"})),
            RaisedFailure::Generic { .. }
        ));
        assert!(matches!(RaisedFailure::from_json(json!(42)), RaisedFailure::Unknown(_)));
        assert!(matches!(
            RaisedFailure::from_json(json!({"foo": [1, 2]})),
            RaisedFailure::Unknown(_)
        ));
    }

    #[test]
    fn test_canonical_code_must_be_a_safe_identifier() {
        let with_code = |code: &str| {
            let payload = json!({
                "category": "security",
                "severity": "high",
                "message": "x",
                "code": code
            });
            normalize(RaisedFailure::from_json(payload), None)
        };
        assert_eq!(with_code("CSRF_MISMATCH").code(), "CSRF_MISMATCH");

        for code in ["call pat@example.org", "123-45-6789", "Bearer abcdefghijklmnop", ""] {
            assert_eq!(with_code(code).code(), ErrorCategory::Security.code(), "{code}");
        }
    }

    #[test]
    fn test_unknown_junk_normalizes() {
        let junk_values = [
            json!(null),
            json!([]),
            json!({"deep": {"nested": true}}),
            json!(""),
            json!(3.5),
        ];
        for junk in junk_values {
            let error = normalize(RaisedFailure::Unknown(junk), None);
            assert_eq!(error.category(), ErrorCategory::System);
            assert!(!error.message().is_empty());
        }
    }

    #[test]
    fn test_sqlx_errors() {
        let error = normalize(sqlx::Error::PoolTimedOut.into(), None);
        assert_eq!(error.message(), "Database operation timed out");
        assert_eq!(error.severity(), ErrorSeverity::High);

        let error = normalize(sqlx::Error::RowNotFound.into(), None);
        assert_eq!(error.category(), ErrorCategory::NotFound);
        assert_eq!(error.status_code(), 404);
    }

    #[test]
    fn test_from_error_walks_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged");
        let app = AppError::IoError(io);
        let failure = RaisedFailure::from_error(&app);
        match failure {
            RaisedFailure::Generic { message, .. } => assert!(message.contains("disk unplugged")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_error_recognizes_sqlx() {
        let app = AppError::SqlxError(sqlx::Error::PoolTimedOut);
        assert!(matches!(
            RaisedFailure::from_error(&app),
            RaisedFailure::Driver { ref code, .. } if code == "POOL_TIMEOUT"
        ));
    }
}
