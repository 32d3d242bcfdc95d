//! In-memory store, used in tests and when no database is configured

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, ClassifiedError, Result};
use crate::escalation::records::{
    AdminNotification, Administrator, AuditEvent, ComplianceTask, IncidentRecord,
};
use crate::logging::LogEntry;
use crate::storage::ErrorStore;

/// Kind of write, for targeted failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Error,
    LogBatch,
    AuditEvent,
    Incident,
    ComplianceTask,
    Notification,
}

#[derive(Default)]
struct Tables {
    errors: Vec<ClassifiedError>,
    log_entries: Vec<LogEntry>,
    log_batches: Vec<Uuid>,
    audit_events: Vec<AuditEvent>,
    incidents: Vec<IncidentRecord>,
    compliance_tasks: Vec<ComplianceTask>,
    notifications: Vec<AdminNotification>,
    administrators: Vec<Administrator>,
}

/// ErrorStore backed by vectors behind a tokio RwLock
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_all: AtomicBool,
    failing: Mutex<HashSet<WriteKind>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched off
    pub fn fail_writes(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make one kind of write fail until switched off
    pub fn fail_on(&self, kind: WriteKind, fail: bool) {
        let mut failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if fail {
            failing.insert(kind);
        } else {
            failing.remove(&kind);
        }
    }

    fn check(&self, kind: WriteKind) -> Result<()> {
        let failing = self.fail_all.load(Ordering::SeqCst)
            || self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&kind);
        if failing {
            return Err(AppError::storage(format!("injected {kind:?} write failure")));
        }
        Ok(())
    }

    pub async fn add_administrator(&self, administrator: Administrator) {
        self.tables.write().await.administrators.push(administrator);
    }

    pub async fn errors(&self) -> Vec<ClassifiedError> {
        self.tables.read().await.errors.clone()
    }

    pub async fn log_entries(&self) -> Vec<LogEntry> {
        self.tables.read().await.log_entries.clone()
    }

    /// Ids of batches written so far
    pub async fn log_batches(&self) -> Vec<Uuid> {
        self.tables.read().await.log_batches.clone()
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.tables.read().await.audit_events.clone()
    }

    pub async fn incidents(&self) -> Vec<IncidentRecord> {
        self.tables.read().await.incidents.clone()
    }

    pub async fn compliance_tasks(&self) -> Vec<ComplianceTask> {
        self.tables.read().await.compliance_tasks.clone()
    }

    pub async fn notifications(&self) -> Vec<AdminNotification> {
        self.tables.read().await.notifications.clone()
    }
}

#[async_trait]
impl ErrorStore for MemoryStore {
    async fn save_error(&self, error: &ClassifiedError) -> Result<()> {
        self.check(WriteKind::Error)?;
        let mut tables = self.tables.write().await;
        if !tables.errors.iter().any(|e| e.id() == error.id()) {
            tables.errors.push(error.clone());
        }
        Ok(())
    }

    async fn save_log_batch(&self, batch_id: Uuid, entries: &[LogEntry]) -> Result<()> {
        self.check(WriteKind::LogBatch)?;
        let mut tables = self.tables.write().await;
        let known: HashSet<Uuid> = tables.log_entries.iter().map(|e| e.id).collect();
        let fresh: Vec<LogEntry> = entries
            .iter()
            .filter(|e| !known.contains(&e.id))
            .cloned()
            .collect();
        tables.log_entries.extend(fresh);
        tables.log_batches.push(batch_id);
        Ok(())
    }

    async fn save_audit_event(&self, event: &AuditEvent) -> Result<bool> {
        self.check(WriteKind::AuditEvent)?;
        let mut tables = self.tables.write().await;
        if tables.audit_events.iter().any(|e| e.error_id == event.error_id) {
            return Ok(false);
        }
        tables.audit_events.push(event.clone());
        Ok(true)
    }

    async fn create_incident(&self, incident: &IncidentRecord) -> Result<bool> {
        self.check(WriteKind::Incident)?;
        let mut tables = self.tables.write().await;
        if tables.incidents.iter().any(|i| i.error_id == incident.error_id) {
            return Ok(false);
        }
        tables.incidents.push(incident.clone());
        Ok(true)
    }

    async fn create_compliance_task(&self, task: &ComplianceTask) -> Result<bool> {
        self.check(WriteKind::ComplianceTask)?;
        let mut tables = self.tables.write().await;
        if tables.compliance_tasks.iter().any(|t| t.error_id == task.error_id) {
            return Ok(false);
        }
        tables.compliance_tasks.push(task.clone());
        Ok(true)
    }

    async fn create_notification(&self, notification: &AdminNotification) -> Result<bool> {
        self.check(WriteKind::Notification)?;
        let mut tables = self.tables.write().await;
        let exists = tables
            .notifications
            .iter()
            .any(|n| {
                n.error_id == notification.error_id && n.recipient_id == notification.recipient_id
            });
        if exists {
            return Ok(false);
        }
        tables.notifications.push(notification.clone());
        Ok(true)
    }

    async fn active_administrators(&self) -> Result<Vec<Administrator>> {
        Ok(self
            .tables
            .read()
            .await
            .administrators
            .iter()
            .filter(|a| a.active)
            .cloned()
            .collect())
    }
}
