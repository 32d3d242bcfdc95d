use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::error::{ErrorHandler, Result};
use crate::escalation::{EscalationBridge, Escalator};
use crate::logging::{Logger, LoggerConfig};
use crate::storage::{ErrorStore, SqliteStore};

/// Pipeline components, built once at startup and shared by reference
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ErrorStore>,
    pub logger: Logger,
    pub bridge: Arc<EscalationBridge>,
    pub handler: ErrorHandler,
}

impl AppState {
    /// Open the configured database and wire the pipeline over it
    pub async fn from_config(config: Config) -> Result<Self> {
        let store = SqliteStore::connect(&config.database_url).await?;
        Self::initialize(config, Arc::new(store))
    }

    /// Wire the pipeline over `store` and start the periodic log flush.
    ///
    /// Must be called inside a tokio runtime.
    pub fn initialize(config: Config, store: Arc<dyn ErrorStore>) -> Result<Self> {
        config.validate()?;

        let logger = Logger::new(LoggerConfig::from(&config), store.clone())?;
        logger.start_periodic_flush()?;

        let escalator =
            Escalator::new(store.clone(), logger.clone(), config.compliance_role.clone());
        let bridge = Arc::new(EscalationBridge::new(escalator, config.escalation_queue));
        let handler =
            ErrorHandler::new(logger.clone(), store.clone(), bridge.clone(), config.environment);

        info!(environment = %config.environment, "Error pipeline initialized");
        Ok(Self {
            config,
            store,
            logger,
            bridge,
            handler,
        })
    }

    /// Drain escalation, then the log buffer
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.bridge.shutdown().await {
            error!(error = %e, "Escalation bridge did not shut down cleanly");
        }
        self.logger.shutdown().await?;
        info!("Error pipeline shut down");
        Ok(())
    }
}
