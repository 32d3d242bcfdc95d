//! Escalation of security-relevant, critical and non-operational errors
//!
//! [`Escalator`] performs the side effects for one error. [`EscalationBridge`] owns a
//! background worker that runs the escalator for every error queued through
//! [`EscalationBridge::initiate`], so request handling never waits for them.

use std::collections::{HashSet, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::taxonomy;
use crate::error::{AppError, ClassifiedError, ErrorCategory, ErrorContext, ErrorSeverity, Result};
use crate::logging::Logger;
use crate::storage::ErrorStore;

pub mod records;

use records::{AdminNotification, AuditEvent, ComplianceTask, IncidentRecord};

/// A side effect of escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscalationStep {
    AuditEvent,
    Incident,
    Notifications,
    ComplianceTask,
}

impl Display for EscalationStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuditEvent => write!(f, "audit_event"),
            Self::Incident => write!(f, "incident"),
            Self::Notifications => write!(f, "notifications"),
            Self::ComplianceTask => write!(f, "compliance_task"),
        }
    }
}

/// What escalating one error did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationOutcome {
    pub audit_recorded: bool,
    pub incident_created: bool,
    pub notifications_sent: usize,
    pub compliance_task_created: bool,
    pub critical_logged: bool,
    pub failed_steps: Vec<EscalationStep>,
}

impl EscalationOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

/// Runs the escalation side effects for a single error
#[derive(Clone)]
pub struct Escalator {
    store: Arc<dyn ErrorStore>,
    logger: Logger,
    compliance_role: String,
}

impl Escalator {
    pub fn new(
        store: Arc<dyn ErrorStore>,
        logger: Logger,
        compliance_role: impl Into<String>,
    ) -> Self {
        Self {
            store,
            logger,
            compliance_role: compliance_role.into(),
        }
    }

    /// Escalate `error`. Errors that do not qualify are ignored.
    ///
    /// A failing step is logged and the remaining steps still run.
    #[instrument(skip(self, error), fields(error_id = %error.id(), category = %error.category()))]
    pub async fn escalate(&self, error: &ClassifiedError) -> EscalationOutcome {
        let mut outcome = EscalationOutcome::default();
        if !error.requires_escalation() {
            return outcome;
        }

        if taxonomy::is_security_relevant(error.category()) {
            match self.store.save_audit_event(&AuditEvent::from_error(error)).await {
                Ok(created) => outcome.audit_recorded = created,
                Err(e) => {
                    self.step_failed(error, EscalationStep::AuditEvent, &e, &mut outcome)
                        .await
                }
            }
        }

        if !error.is_operational() {
            let incident = IncidentRecord::from_error(error);
            match self.store.create_incident(&incident).await {
                Ok(created) => outcome.incident_created = created,
                Err(e) => {
                    self.step_failed(error, EscalationStep::Incident, &e, &mut outcome)
                        .await
                }
            }
            match self.notify_administrators(&incident).await {
                Ok(sent) => outcome.notifications_sent = sent,
                Err(e) => {
                    self.step_failed(error, EscalationStep::Notifications, &e, &mut outcome)
                        .await
                }
            }
        }

        if error.category() == ErrorCategory::PrivacyViolation {
            let task = ComplianceTask::from_error(error, &self.compliance_role);
            match self.store.create_compliance_task(&task).await {
                Ok(created) => outcome.compliance_task_created = created,
                Err(e) => {
                    self.step_failed(error, EscalationStep::ComplianceTask, &e, &mut outcome)
                        .await
                }
            }
        }

        if error.severity() == ErrorSeverity::Critical && error.is_operational() {
            self.logger
                .fatal("critical error escalated", escalation_context(error))
                .await;
            outcome.critical_logged = true;
        }

        debug!(?outcome, "Escalation finished");
        outcome
    }

    /// One notification per active administrator; returns how many were new
    async fn notify_administrators(&self, incident: &IncidentRecord) -> Result<usize> {
        let administrators = self.store.active_administrators().await?;
        let mut sent = 0;
        let mut last_error = None;
        for administrator in &administrators {
            let notification = AdminNotification::for_administrator(incident, administrator);
            match self.store.create_notification(&notification).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        recipient_id = %administrator.id,
                        error = %e,
                        "Failed to notify administrator"
                    );
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    async fn step_failed(
        &self,
        error: &ClassifiedError,
        step: EscalationStep,
        cause: &AppError,
        outcome: &mut EscalationOutcome,
    ) {
        outcome.failed_steps.push(step);
        let context = escalation_context(error)
            .with("step", step.to_string())
            .with("reason", cause.to_string());
        self.logger.error("escalation step failed", context).await;
    }
}

fn escalation_context(error: &ClassifiedError) -> ErrorContext {
    let mut context = ErrorContext::new()
        .with("errorId", error.id().to_string())
        .with("category", error.category().to_string())
        .with("severity", error.severity().to_string())
        .with("code", error.code());
    if let Some(request_id) = error.request_id() {
        context.insert("requestId", request_id);
    }
    context
}

/// How many recently escalated error ids the worker remembers
pub const RECENT_ESCALATIONS: usize = 4096;

/// Fixed-size record of recently escalated ids; the oldest id is forgotten first.
///
/// Older repeats are still caught by the store, which writes each record once per error id.
#[derive(Debug)]
pub struct RecentIds {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    limit: usize,
}

impl RecentIds {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            ids: HashSet::with_capacity(limit),
            order: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Remember `id`; false when it is already remembered
    pub fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Owner of the escalation worker
pub struct EscalationBridge {
    sender: Mutex<Option<mpsc::Sender<ClassifiedError>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    escalated: Arc<Mutex<RecentIds>>,
}

impl EscalationBridge {
    /// Spawn the worker; must be called inside a tokio runtime
    pub fn new(escalator: Escalator, queue_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let escalated = Arc::new(Mutex::new(RecentIds::new(RECENT_ESCALATIONS)));
        let worker = tokio::spawn(run_worker(escalator, receiver, escalated.clone()));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            escalated,
        }
    }

    /// Queue an error for escalation; waits only when the queue is full
    pub async fn initiate(&self, error: ClassifiedError) -> Result<()> {
        let sender = lock(&self.sender)
            .clone()
            .ok_or_else(|| AppError::escalation("escalation bridge is shut down"))?;
        sender
            .send(error)
            .await
            .map_err(|e| {
                AppError::escalation(format!(
                    "escalation worker stopped, dropped error {}",
                    e.0.id()
                ))
            })
    }

    /// Whether the worker recently escalated the error with this id
    pub fn has_escalated(&self, error_id: Uuid) -> bool {
        lock(&self.escalated).contains(&error_id)
    }

    /// Close the queue and wait for the worker to finish what is queued
    pub async fn shutdown(&self) -> Result<()> {
        drop(lock(&self.sender).take());
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| AppError::escalation(format!("escalation worker failed: {e}")))?;
        }
        Ok(())
    }
}

async fn run_worker(
    escalator: Escalator,
    mut receiver: mpsc::Receiver<ClassifiedError>,
    escalated: Arc<Mutex<RecentIds>>,
) {
    info!("Escalation worker started");
    while let Some(error) = receiver.recv().await {
        if !lock(&escalated).insert(error.id()) {
            debug!(error_id = %error.id(), "Error recently escalated, skipping");
            continue;
        }
        let outcome = escalator.escalate(&error).await;
        if !outcome.is_clean() {
            warn!(
                error_id = %error.id(),
                failed_steps = ?outcome.failed_steps,
                "Escalation completed with failures"
            );
        }
    }
    info!("Escalation worker stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
