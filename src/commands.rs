//! Commands accepted by the `haven` binary, one JSON object per line
//!
//! `{"type":"failure","failure":{..},"request":{..}}` runs a failure through the pipeline,
//! `{"type":"log","level":..,"message":..}` ingests a frontend log message. A line without
//! a `type` is treated as a bare failure payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ErrorContext, ErrorResponse, RequestMeta, Result};
use crate::logging::LogLevel;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct LogEntry {
    level: String,
    message: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInput {
    method: Option<String>,
    path: Option<String>,
    request_id: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
}

impl From<RequestInput> for RequestMeta {
    fn from(input: RequestInput) -> Self {
        let mut meta = RequestMeta {
            method: input.method,
            path: input.path,
            user_id: input.user_id,
            session_id: input.session_id,
            ..Default::default()
        };
        if let Some(request_id) = input.request_id {
            meta.request_id = request_id;
        }
        meta
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Failure {
        failure: Value,
        #[serde(default)]
        request: RequestInput,
    },
    Log(LogEntry),
}

/// Result of one command
#[derive(Debug, Serialize)]
pub struct CommandOutput {
    pub status: u16,
    pub body: Value,
}

impl From<ErrorResponse> for CommandOutput {
    fn from(response: ErrorResponse) -> Self {
        Self {
            status: response.status,
            body: response.to_json(),
        }
    }
}

/// Record a log message sent by a client; unknown levels are logged at info
pub async fn log_frontend_message(state: &AppState, entry: LogEntry) -> Result<()> {
    let level = LogLevel::parse(&entry.level).unwrap_or(LogLevel::Info);

    let mut context = match entry.metadata {
        Some(metadata) => ErrorContext::from_value(metadata),
        None => ErrorContext::new(),
    };
    context.insert("origin", "frontend");
    if let Some(source) = entry.source {
        context.insert("clientSource", source);
    }
    if let Some(timestamp) = entry.timestamp {
        context.insert("clientTimestamp", timestamp);
    }

    state.logger.log(level, &entry.message, context).await;
    Ok(())
}

/// Tagged commands; any other object, including errors with their own `type`, is a failure
fn is_command(value: &Value) -> bool {
    matches!(value.get("type").and_then(Value::as_str), Some("failure" | "log"))
}

/// Handle a failure payload on behalf of a request
pub async fn handle_failure(
    state: &AppState,
    failure: Value,
    request: RequestMeta,
) -> CommandOutput {
    state.handler.handle_json(failure, &request).await.into()
}

/// Parse and run one input line; blank lines and log commands produce no output
pub async fn dispatch_line(state: &AppState, line: &str) -> Result<Option<CommandOutput>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)?;
    if !is_command(&value) {
        return Ok(Some(handle_failure(state, value, RequestMeta::default()).await));
    }

    match serde_json::from_value::<Command>(value)? {
        Command::Failure { failure, request } => {
            Ok(Some(handle_failure(state, failure, request.into()).await))
        }
        Command::Log(entry) => {
            debug!(level = %entry.level, "Frontend log message");
            log_frontend_message(state, entry).await?;
            Ok(None)
        }
    }
}
