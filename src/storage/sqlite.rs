use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{ClassifiedError, Result};
use crate::escalation::records::{
    AdminNotification, Administrator, AuditEvent, ComplianceTask, IncidentRecord,
};
use crate::logging::LogEntry;
use crate::storage::ErrorStore;
use crate::storage::db::DatabaseManager;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS error_records (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        category TEXT NOT NULL,
        severity TEXT NOT NULL,
        status_code INTEGER NOT NULL,
        is_operational BOOLEAN NOT NULL,
        code TEXT NOT NULL,
        message TEXT NOT NULL,
        context TEXT NOT NULL,
        user_id TEXT,
        session_id TEXT,
        request_id TEXT,
        stack_trace TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS log_entries (
        id TEXT PRIMARY KEY,
        batch_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        context TEXT NOT NULL,
        source TEXT NOT NULL,
        metadata TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_log_entries_batch ON log_entries (batch_id)",
    r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id TEXT PRIMARY KEY,
        error_id TEXT NOT NULL UNIQUE,
        category TEXT NOT NULL,
        action TEXT NOT NULL,
        outcome TEXT NOT NULL,
        risk_level TEXT NOT NULL,
        user_id TEXT,
        session_id TEXT,
        request_id TEXT,
        description TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS incident_records (
        id TEXT PRIMARY KEY,
        error_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        category TEXT NOT NULL,
        priority TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS compliance_tasks (
        id TEXT PRIMARY KEY,
        error_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        assigned_role TEXT NOT NULL,
        due_at TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS admin_notifications (
        id TEXT PRIMARY KEY,
        error_id TEXT NOT NULL,
        recipient_id TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        priority TEXT NOT NULL,
        is_read BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE (error_id, recipient_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS administrators (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT 1
    )
    "#,
];

/// SQLite implementation of the ErrorStore trait
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store over an existing pool; call [`SqliteStore::init_schema`] before use
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `database_url` and create the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = DatabaseManager::new(database_url).await?;
        let store = Self::new(db.pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(err, skip(self))]
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Error store schema ready");
        Ok(())
    }

    /// Add or update an administrator who receives incident notifications
    #[instrument(err, skip(self, administrator), fields(administrator_id = %administrator.id))]
    pub async fn register_administrator(&self, administrator: &Administrator) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO administrators (id, name, active)
            VALUES (?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active
            "#,
        )
        .bind(&administrator.id)
        .bind(&administrator.name)
        .bind(administrator.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ErrorStore for SqliteStore {
    #[instrument(err, skip(self, error), fields(error_id = %error.id()))]
    async fn save_error(&self, error: &ClassifiedError) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO error_records (
                id, timestamp, category, severity, status_code, is_operational, code, message,
                context, user_id, session_id, request_id, stack_trace
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(error.id().to_string())
        .bind(error.timestamp().to_rfc3339())
        .bind(error.category().to_string())
        .bind(error.severity().to_string())
        .bind(i64::from(error.status_code()))
        .bind(error.is_operational())
        .bind(error.code())
        .bind(error.message())
        .bind(serde_json::to_string(error.context())?)
        .bind(error.user_id())
        .bind(error.session_id())
        .bind(error.request_id())
        .bind(error.stack_trace())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(err, skip(self, entries), fields(count = entries.len()))]
    async fn save_log_batch(&self, batch_id: Uuid, entries: &[LogEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO log_entries
                    (id, batch_id, timestamp, level, message, context, source, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.id.to_string())
            .bind(batch_id.to_string())
            .bind(entry.timestamp.to_rfc3339())
            .bind(entry.level.to_string())
            .bind(&entry.message)
            .bind(serde_json::to_string(&entry.context)?)
            .bind(&entry.source)
            .bind(serde_json::to_string(&entry.metadata)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(err, skip(self, event), fields(error_id = %event.error_id))]
    async fn save_audit_event(&self, event: &AuditEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO audit_events (
                id, error_id, category, action, outcome, risk_level, user_id, session_id,
                request_id, description, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.error_id.to_string())
        .bind(event.category.to_string())
        .bind(&event.action)
        .bind(&event.outcome)
        .bind(event.risk_level.to_string())
        .bind(&event.user_id)
        .bind(&event.session_id)
        .bind(&event.request_id)
        .bind(&event.description)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(err, skip(self, incident), fields(error_id = %incident.error_id))]
    async fn create_incident(&self, incident: &IncidentRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO incident_records (
                id, error_id, title, description, category, priority, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident.id.to_string())
        .bind(incident.error_id.to_string())
        .bind(&incident.title)
        .bind(&incident.description)
        .bind(incident.category.to_string())
        .bind(incident.priority.to_string())
        .bind(incident.status.to_string())
        .bind(incident.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(err, skip(self, task), fields(error_id = %task.error_id))]
    async fn create_compliance_task(&self, task: &ComplianceTask) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO compliance_tasks (
                id, error_id, title, description, assigned_role, due_at, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.error_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.assigned_role)
        .bind(task.due_at.to_rfc3339())
        .bind(task.status.to_string())
        .bind(task.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(err, skip(self, notification), fields(error_id = %notification.error_id))]
    async fn create_notification(&self, notification: &AdminNotification) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO admin_notifications (
                id, error_id, recipient_id, title, message, priority, is_read, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(notification.id.to_string())
        .bind(notification.error_id.to_string())
        .bind(&notification.recipient_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.priority.to_string())
        .bind(notification.read)
        .bind(notification.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(err, skip(self))]
    async fn active_administrators(&self) -> Result<Vec<Administrator>> {
        let rows = sqlx::query(
            "SELECT id, name, active FROM administrators WHERE active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Administrator> {
                Ok(Administrator {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, ErrorContext, ErrorSeverity};
    use crate::logging::{LogLevel, LogMetadata};

    async fn store() -> SqliteStore {
        let store = SqliteStore::new(DatabaseManager::setup_test_db().await.pool);
        store.init_schema().await.unwrap();
        store
    }

    async fn count(store: &SqliteStore, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_schema_is_reentrant() {
        let store = store().await;
        store.init_schema().await.unwrap();
        assert_eq!(count(&store, "error_records").await, 0);
    }

    #[tokio::test]
    async fn test_save_error_round_trips_fields() {
        let store = store().await;
        let error = ClassifiedError::builder(ErrorCategory::Database, "Unique constraint violation")
            .with_severity(ErrorSeverity::Medium)
            .with_request_id("req-1")
            .with_context("driverCode", "P2002")
            .build();

        store.save_error(&error).await.unwrap();
        store.save_error(&error).await.unwrap();
        assert_eq!(count(&store, "error_records").await, 1);

        let row = sqlx::query(
            "SELECT category, severity, status_code, context, request_id FROM error_records",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(row.get::<String, _>("category"), "database");
        assert_eq!(row.get::<String, _>("severity"), "medium");
        assert_eq!(row.get::<i64, _>("status_code"), 500);
        assert_eq!(row.get::<Option<String>, _>("request_id").as_deref(), Some("req-1"));
        assert!(row.get::<String, _>("context").contains("P2002"));
    }

    #[tokio::test]
    async fn test_log_batch_insert_is_idempotent_per_entry() {
        let store = store().await;
        let entries: Vec<_> = (0..3)
            .map(|i| {
                LogEntry::new(
                    LogLevel::Info,
                    format!("entry {i}"),
                    ErrorContext::new(),
                    "test",
                    LogMetadata::current("test"),
                )
            })
            .collect();

        store.save_log_batch(Uuid::new_v4(), &entries).await.unwrap();
        // A retried batch after an ambiguous failure
        store.save_log_batch(Uuid::new_v4(), &entries).await.unwrap();
        assert_eq!(count(&store, "log_entries").await, 3);
    }

    #[tokio::test]
    async fn test_escalation_records_once_per_error() {
        let store = store().await;
        let error = ClassifiedError::privacy_violation("Unauthorized PHI access");

        assert!(store.save_audit_event(&AuditEvent::from_error(&error)).await.unwrap());
        assert!(!store.save_audit_event(&AuditEvent::from_error(&error)).await.unwrap());

        let incident = IncidentRecord::from_error(&error);
        assert!(store.create_incident(&incident).await.unwrap());
        assert!(!store.create_incident(&IncidentRecord::from_error(&error)).await.unwrap());

        let task = |role: &str| ComplianceTask::from_error(&error, role);
        assert!(store.create_compliance_task(&task("compliance_officer")).await.unwrap());
        assert!(!store.create_compliance_task(&task("compliance_officer")).await.unwrap());

        let admin = Administrator { id: "admin-1".into(), name: "Ops".into(), active: true };
        let notification = || AdminNotification::for_administrator(&incident, &admin);
        assert!(store.create_notification(&notification()).await.unwrap());
        assert!(!store.create_notification(&notification()).await.unwrap());
    }

    #[tokio::test]
    async fn test_only_active_administrators_are_listed() {
        let store = store().await;
        let active = Administrator { id: "a".into(), name: "Active".into(), active: true };
        let retired = Administrator { id: "b".into(), name: "Retired".into(), active: false };
        store.register_administrator(&active).await.unwrap();
        store.register_administrator(&retired).await.unwrap();

        let admins = store.active_administrators().await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].id, "a");
    }
}
