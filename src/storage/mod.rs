//! Persistence collaborator of the pipeline

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{ClassifiedError, Result};
use crate::escalation::records::{
    AdminNotification, Administrator, AuditEvent, ComplianceTask, IncidentRecord,
};
use crate::logging::LogEntry;

pub mod db;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage used by the logger, the handler and escalation.
///
/// Record writes are idempotent: writing the same entry id, error id, or
/// (error id, recipient) pair twice leaves one row. The `create_*` methods return
/// whether a new row was written.
#[async_trait]
pub trait ErrorStore: Send + Sync {
    /// Persist a (redacted) error record
    async fn save_error(&self, error: &ClassifiedError) -> Result<()>;

    /// Persist one flushed batch of log entries
    async fn save_log_batch(&self, batch_id: Uuid, entries: &[LogEntry]) -> Result<()>;

    async fn save_audit_event(&self, event: &AuditEvent) -> Result<bool>;

    async fn create_incident(&self, incident: &IncidentRecord) -> Result<bool>;

    async fn create_compliance_task(&self, task: &ComplianceTask) -> Result<bool>;

    async fn create_notification(&self, notification: &AdminNotification) -> Result<bool>;

    /// Administrators that should receive incident notifications
    async fn active_administrators(&self) -> Result<Vec<Administrator>>;
}
