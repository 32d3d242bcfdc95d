//! Sanitizing, buffered logger
//!
//! Every entry is redacted before it is printed or queued. Entries are emitted to the
//! console through `tracing` immediately and persisted in batches through the
//! [`ErrorStore`]: when the buffer reaches capacity, when a fatal entry arrives, on every
//! tick of the periodic flush task, and on shutdown. A batch that fails to persist goes
//! back to the front of the buffer and is retried on the next flush.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Level, debug, error, info, trace, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use crate::config::{Config, Environment};
use crate::error::{AppError, ErrorContext, Result};
use crate::storage::ErrorStore;

pub mod buffer;
pub mod sanitizer;

use buffer::LogBuffer;

pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Log levels for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level for very detailed debugging
    Trace,
    /// Debug level for development information
    Debug,
    /// Info level for general operational information
    Info,
    /// Warn level for concerning but non-critical issues
    Warn,
    /// Error level for errors that affect functionality
    Error,
    /// Fatal level for failures that need immediate attention; flushed right away
    Fatal,
}

impl LogLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "fatal" | "critical" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error | Self::Fatal => "error",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error | LogLevel::Fatal => Level::ERROR,
        }
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" | "plain" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Process information stamped on every entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMetadata {
    pub environment: String,
    pub pid: u32,
    pub version: String,
}

impl LogMetadata {
    pub fn current(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A single sanitized log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub context: ErrorContext,
    pub source: String,
    pub metadata: LogMetadata,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        context: ErrorContext,
        source: impl Into<String>,
        metadata: LogMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context,
            source: source.into(),
            metadata,
        }
    }
}

/// Logger settings
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
    /// Skip redaction; never allowed in production
    pub retain_pii: bool,
    pub environment: Environment,
    pub source: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retain_pii: false,
            environment: Environment::Development,
            source: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl From<&Config> for LoggerConfig {
    fn from(config: &Config) -> Self {
        Self {
            min_level: config.log_level,
            buffer_capacity: config.log_buffer_capacity,
            flush_interval: config.log_flush_interval,
            retain_pii: config.log_retain_pii,
            environment: config.environment,
            source: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

struct PeriodicFlush {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct LoggerInner {
    config: LoggerConfig,
    metadata: LogMetadata,
    store: Arc<dyn ErrorStore>,
    buffer: Mutex<LogBuffer>,
    /// Serializes flushes so a requeued batch lands ahead of newer entries
    flush_lock: tokio::sync::Mutex<()>,
    timer_started: AtomicBool,
    timer: Mutex<Option<PeriodicFlush>>,
}

/// Buffered logger; clones share one buffer
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(config: LoggerConfig, store: Arc<dyn ErrorStore>) -> Result<Self> {
        if config.retain_pii && config.environment.is_production() {
            return Err(AppError::configuration("retain_pii cannot be enabled in production"));
        }
        if config.buffer_capacity == 0 {
            return Err(AppError::configuration("log buffer capacity must be greater than zero"));
        }
        if config.flush_interval.is_zero() {
            return Err(AppError::configuration("log flush interval must be greater than zero"));
        }

        Ok(Self {
            inner: Arc::new(LoggerInner {
                metadata: LogMetadata::current(config.environment.to_string()),
                buffer: Mutex::new(LogBuffer::new(config.buffer_capacity)),
                config,
                store,
                flush_lock: tokio::sync::Mutex::new(()),
                timer_started: AtomicBool::new(false),
                timer: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.inner.config
    }

    /// Whether an entry at `level` would be recorded
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.inner.config.min_level
    }

    /// Record an entry; flushes before returning when the buffer fills up or the entry is fatal
    pub async fn log(&self, level: LogLevel, message: &str, context: ErrorContext) {
        if !self.enabled(level) {
            return;
        }

        let entry = self.build_entry(level, message, context);
        emit(&entry);

        let (should_flush, dropped) = {
            let mut buffer = self.buffer();
            let full = buffer.push(entry);
            (full || level == LogLevel::Fatal, buffer.take_unreported_drops())
        };
        self.report_drops(dropped);

        if should_flush {
            if let Err(e) = self.flush().await {
                warn!(error = %e, "Log flush failed, entries kept for retry");
            }
        }
    }

    pub async fn trace(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Trace, message, context).await
    }

    pub async fn debug(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Debug, message, context).await
    }

    pub async fn info(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Info, message, context).await
    }

    pub async fn warn(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Warn, message, context).await
    }

    pub async fn error(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Error, message, context).await
    }

    pub async fn fatal(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Fatal, message, context).await
    }

    /// A logger that merges `context` into every entry; this logger is left untouched
    pub fn with_context(&self, context: ErrorContext) -> ContextualLogger {
        ContextualLogger {
            logger: self.clone(),
            context,
        }
    }

    /// Persist everything currently buffered as one batch.
    ///
    /// Returns the number of entries written. On failure the batch is put back in front
    /// of the buffer and the store error is returned.
    pub async fn flush(&self) -> Result<usize> {
        let _flushing = self.inner.flush_lock.lock().await;

        let batch = self.buffer().take();
        if batch.is_empty() {
            return Ok(0);
        }

        let batch_id = Uuid::new_v4();
        let count = batch.len();
        match self.inner.store.save_log_batch(batch_id, &batch).await {
            Ok(()) => {
                debug!(%batch_id, count, "Flushed log batch");
                Ok(count)
            }
            Err(e) => {
                let dropped = {
                    let mut buffer = self.buffer();
                    buffer.requeue(batch);
                    buffer.take_unreported_drops()
                };
                self.report_drops(dropped);
                Err(e)
            }
        }
    }

    /// Start the periodic flush task; a logger runs at most one
    pub fn start_periodic_flush(&self) -> Result<()> {
        if self.inner.timer_started.swap(true, Ordering::SeqCst) {
            return Err(AppError::logger("periodic flush already started"));
        }

        let logger = self.clone();
        let interval = self.inner.config.flush_interval;
        let (stop, mut stopped) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        if let Err(e) = logger.flush().await {
                            warn!(error = %e, "Periodic log flush failed");
                        }
                    }
                }
            }
        });

        *self.timer() = Some(PeriodicFlush { stop, handle });
        info!(interval_ms = interval.as_millis() as u64, "Started periodic log flush");
        Ok(())
    }

    /// Stop the periodic flush and drain the buffer.
    ///
    /// Fails with [`AppError::UnflushedEntries`] when entries could not be persisted.
    pub async fn shutdown(&self) -> Result<()> {
        let timer = self.timer().take();
        if let Some(PeriodicFlush { stop, handle }) = timer {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                warn!(error = %e, "Periodic flush task ended abnormally");
            }
        }

        let reason = match self.flush().await {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };

        let remaining = self.buffered();
        match (remaining, reason) {
            (0, _) => Ok(()),
            (count, reason) => Err(AppError::UnflushedEntries {
                count,
                reason: reason.unwrap_or_else(|| "entries logged during shutdown".to_string()),
            }),
        }
    }

    /// Entries waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffer().len()
    }

    /// Entries dropped because persistence kept failing
    pub fn dropped(&self) -> u64 {
        self.buffer().dropped()
    }

    fn report_drops(&self, dropped: usize) {
        if dropped > 0 {
            error!(
                dropped_entries = dropped,
                total_dropped = self.dropped(),
                retention_limit = self.inner.config.buffer_capacity * buffer::RETENTION_FACTOR,
                "Log buffer retention limit reached, oldest entries dropped"
            );
        }
    }

    fn build_entry(&self, level: LogLevel, message: &str, context: ErrorContext) -> LogEntry {
        let (message, context) = if self.inner.config.retain_pii {
            (message.to_string(), context)
        } else {
            (sanitizer::sanitize(message), context.sanitized())
        };
        LogEntry::new(
            level,
            message,
            context,
            self.inner.config.source.clone(),
            self.inner.metadata.clone(),
        )
    }

    fn buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.inner.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timer(&self) -> MutexGuard<'_, Option<PeriodicFlush>> {
        self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Logger with context bound at construction
#[derive(Clone)]
pub struct ContextualLogger {
    logger: Logger,
    context: ErrorContext,
}

impl ContextualLogger {
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// A further narrowed logger; keys in `context` win over the bound ones
    pub fn with_context(&self, context: ErrorContext) -> ContextualLogger {
        let mut merged = self.context.clone();
        merged.merge(context);
        self.logger.with_context(merged)
    }

    pub async fn log(&self, level: LogLevel, message: &str, context: ErrorContext) {
        if !self.logger.enabled(level) {
            return;
        }
        let mut merged = self.context.clone();
        merged.merge(context);
        self.logger.log(level, message, merged).await
    }

    pub async fn debug(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Debug, message, context).await
    }

    pub async fn info(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Info, message, context).await
    }

    pub async fn warn(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Warn, message, context).await
    }

    pub async fn error(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Error, message, context).await
    }

    pub async fn fatal(&self, message: &str, context: ErrorContext) {
        self.log(LogLevel::Fatal, message, context).await
    }
}

fn emit(entry: &LogEntry) {
    let context = entry.context.to_value();
    let (log_id, source, message) = (&entry.id, &entry.source, &entry.message);
    match entry.level {
        LogLevel::Trace => trace!(%log_id, %source, %context, "{message}"),
        LogLevel::Debug => debug!(%log_id, %source, %context, "{message}"),
        LogLevel::Info => info!(%log_id, %source, %context, "{message}"),
        LogLevel::Warn => warn!(%log_id, %source, %context, "{message}"),
        LogLevel::Error => error!(%log_id, %source, %context, "{message}"),
        LogLevel::Fatal => error!(%log_id, %source, fatal = true, %context, "{message}"),
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_level.as_filter_directive())
            .map_err(|e| AppError::configuration(format!("invalid log level: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_line_number(true).with_file(true))
            .try_init(),
    };
    installed.map_err(|e| AppError::logger(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn logger_with(store: Arc<MemoryStore>, capacity: usize) -> Logger {
        let config = LoggerConfig {
            buffer_capacity: capacity,
            min_level: LogLevel::Debug,
            ..Default::default()
        };
        Logger::new(config, store).unwrap()
    }

    #[tokio::test]
    async fn test_entries_below_min_level_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 10);

        logger.trace("noise", ErrorContext::new()).await;
        logger.debug("kept", ErrorContext::new()).await;
        assert_eq!(logger.buffered(), 1);
    }

    #[tokio::test]
    async fn test_capacity_triggers_flush() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 3);

        for i in 0..3 {
            logger.info(&format!("entry {i}"), ErrorContext::new()).await;
        }
        assert_eq!(logger.buffered(), 0);
        assert_eq!(store.log_entries().await.len(), 3);
    }

    #[tokio::test]
    async fn test_fatal_triggers_flush() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 100);

        logger.info("before", ErrorContext::new()).await;
        logger.fatal("database gone", ErrorContext::new()).await;
        assert_eq!(logger.buffered(), 0);
        assert_eq!(store.log_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_are_sanitized() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 100);

        logger
            .info("user a@b.com failed", ErrorContext::new().with("password", "hunter2"))
            .await;
        logger.flush().await.unwrap();

        let entries = store.log_entries().await;
        assert_eq!(entries[0].message, "user [EMAIL] failed");
        assert_eq!(entries[0].context.get_str("password"), Some(sanitizer::REDACTED));
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_batch() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 100);

        logger.info("first", ErrorContext::new()).await;
        store.fail_writes(true);
        assert!(logger.flush().await.is_err());
        assert_eq!(logger.buffered(), 1);

        logger.info("second", ErrorContext::new()).await;
        store.fail_writes(false);
        assert_eq!(logger.flush().await.unwrap(), 2);

        let messages: Vec<_> = store.log_entries().await.into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_contextual_logger_merges_bound_context() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 100);
        let bound = ErrorContext::new().with("requestId", "req-1").with("path", "/a");
        let scoped = logger.with_context(bound);

        scoped.info("hello", ErrorContext::new().with("path", "/b")).await;
        logger.info("plain", ErrorContext::new()).await;
        logger.flush().await.unwrap();

        let entries = store.log_entries().await;
        assert_eq!(entries[0].context.get_str("requestId"), Some("req-1"));
        assert_eq!(entries[0].context.get_str("path"), Some("/b"));
        assert!(entries[1].context.is_empty());
    }

    #[tokio::test]
    async fn test_periodic_flush_starts_once() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 100);

        logger.start_periodic_flush().unwrap();
        assert!(logger.start_periodic_flush().is_err());
        logger.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_persists_on_tick() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 100);
        logger.start_periodic_flush().unwrap();

        logger.info("tick me", ErrorContext::new()).await;
        tokio::time::sleep(DEFAULT_FLUSH_INTERVAL + Duration::from_millis(10)).await;

        assert_eq!(store.log_entries().await.len(), 1);
        logger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_reports_unflushed_entries() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 100);

        logger.info("stuck", ErrorContext::new()).await;
        store.fail_writes(true);
        match logger.shutdown().await {
            Err(AppError::UnflushedEntries { count, .. }) => assert_eq!(count, 1),
            other => panic!("expected unflushed entries, got {other:?}"),
        }
    }

    #[derive(Clone, Default)]
    struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedOutput {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_retention_drops_are_reported() {
        let output = CapturedOutput::default();
        let writer = output.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = Arc::new(MemoryStore::new());
        let logger = logger_with(store.clone(), 2);
        store.fail_writes(true);
        for i in 0..30 {
            logger.info(&format!("entry {i}"), ErrorContext::new()).await;
        }
        store.fail_writes(false);
        logger.flush().await.unwrap();

        assert_eq!(logger.dropped(), 10);
        assert_eq!(store.log_entries().await.len(), 20);

        let text = output.text();
        let reports: Vec<_> = text
            .lines()
            .filter(|line| line.contains("Log buffer retention limit reached"))
            .collect();
        assert_eq!(reports.len(), 10, "{text}");
        assert!(
            reports
                .iter()
                .all(|line| line.contains("ERROR") && line.contains("dropped_entries=1"))
        );
        assert!(reports.last().is_some_and(|line| line.contains("total_dropped=10")));
    }

    #[test]
    fn test_retain_pii_rejected_in_production() {
        let config = LoggerConfig {
            retain_pii: true,
            environment: Environment::Production,
            ..Default::default()
        };
        assert!(Logger::new(config, Arc::new(MemoryStore::new())).is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Error < LogLevel::Fatal);
        assert_eq!(Level::from(LogLevel::Fatal), Level::ERROR);
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
    }
}
