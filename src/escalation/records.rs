//! Records written by escalation, and their pure mapping from a classified error

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClassifiedError;
use crate::error::taxonomy::{self, AuditCategory, ErrorCategory, ErrorSeverity, RiskLevel};
use crate::logging::sanitizer;

/// Time a privacy violation may stay unreviewed
pub const COMPLIANCE_REVIEW_WINDOW: Duration = Duration::hours(24);

/// Audit-trail entry for a security-relevant error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub error_id: Uuid,
    pub category: AuditCategory,
    pub action: String,
    pub outcome: String,
    pub risk_level: RiskLevel,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    /// Redacted error message
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn from_error(error: &ClassifiedError) -> Self {
        let outcome = match error.category() {
            ErrorCategory::Security | ErrorCategory::PrivacyViolation => "blocked",
            _ => "failure",
        };
        Self {
            id: Uuid::new_v4(),
            error_id: error.id(),
            category: taxonomy::audit_category_for(error.category()),
            action: format!("error.{}", error.category()),
            outcome: outcome.to_string(),
            risk_level: taxonomy::risk_level_for(error.severity()),
            user_id: error.user_id().map(str::to_string),
            session_id: error.session_id().map(str::to_string),
            request_id: error.request_id().map(str::to_string),
            description: sanitizer::sanitize(error.message()),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl IncidentPriority {
    pub fn from_severity(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Low => Self::Low,
            ErrorSeverity::Medium => Self::Medium,
            ErrorSeverity::High => Self::High,
            ErrorSeverity::Critical => Self::Urgent,
        }
    }
}

impl Display for IncidentPriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Open,
    Pending,
    Resolved,
}

impl Display for RecordStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Incident opened for a non-operational error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    pub id: Uuid,
    pub error_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: ErrorCategory,
    pub priority: IncidentPriority,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

impl IncidentRecord {
    pub fn from_error(error: &ClassifiedError) -> Self {
        Self {
            id: Uuid::new_v4(),
            error_id: error.id(),
            title: format!("{} incident ({})", error.category(), error.code()),
            description: sanitizer::sanitize(error.message()),
            category: error.category(),
            priority: IncidentPriority::from_severity(error.severity()),
            status: RecordStatus::Open,
            created_at: Utc::now(),
        }
    }
}

/// Review task created for every privacy violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceTask {
    pub id: Uuid,
    pub error_id: Uuid,
    pub title: String,
    pub description: String,
    pub assigned_role: String,
    pub due_at: DateTime<Utc>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

impl ComplianceTask {
    /// Due one review window after the error occurred
    pub fn from_error(error: &ClassifiedError, assigned_role: &str) -> Self {
        let violation = error.context().get_str("violationType").unwrap_or("unspecified");
        Self {
            id: Uuid::new_v4(),
            error_id: error.id(),
            title: format!("Review privacy violation: {}", sanitizer::sanitize(violation)),
            description: sanitizer::sanitize(error.message()),
            assigned_role: assigned_role.to_string(),
            due_at: error.timestamp() + COMPLIANCE_REVIEW_WINDOW,
            status: RecordStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Someone who receives incident notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Administrator {
    pub id: String,
    pub name: String,
    pub active: bool,
}

/// Notice of an incident sent to one administrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotification {
    pub id: Uuid,
    pub error_id: Uuid,
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    pub priority: IncidentPriority,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl AdminNotification {
    pub fn for_administrator(incident: &IncidentRecord, administrator: &Administrator) -> Self {
        Self {
            id: Uuid::new_v4(),
            error_id: incident.error_id,
            recipient_id: administrator.id.clone(),
            title: format!("[{}] {}", incident.priority, incident.title),
            message: incident.description.clone(),
            priority: incident.priority,
            read: false,
            created_at: Utc::now(),
        }
    }
}
