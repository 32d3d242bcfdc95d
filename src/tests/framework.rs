//! Pipeline testing harness
//!
//! Builds a complete [`AppState`] over a [`MemoryStore`] so tests can drive failures
//! through the handler and inspect every record the pipeline wrote.

use std::sync::Arc;

use crate::config::{Config, Environment};
use crate::error::{ErrorResponse, RaisedFailure, RequestMeta};
use crate::escalation::records::Administrator;
use crate::logging::LogLevel;
use crate::state::AppState;
use crate::storage::memory::MemoryStore;

/// Configuration for the test pipeline
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub environment: Environment,
    pub buffer_capacity: usize,
    /// Active administrators registered before the pipeline starts
    pub administrators: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Test,
            buffer_capacity: 100,
            administrators: 2,
        }
    }
}

pub struct TestPipeline {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl TestPipeline {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        for i in 0..test_config.administrators {
            store
                .add_administrator(Administrator {
                    id: format!("admin-{i}"),
                    name: format!("Administrator {i}"),
                    active: true,
                })
                .await;
        }

        let config = Config {
            environment: test_config.environment,
            log_level: LogLevel::Debug,
            log_buffer_capacity: test_config.buffer_capacity,
            ..Config::default()
        };
        let state =
            AppState::initialize(config, store.clone()).expect("Failed to initialize pipeline");
        Self { store, state }
    }

    pub async fn handle(&self, failure: impl Into<RaisedFailure>) -> ErrorResponse {
        self.state.handler.handle(failure, &RequestMeta::new("GET", "/test")).await
    }

    /// Drain escalation and logs so the store holds everything
    pub async fn settle(&self) {
        self.state.shutdown().await.expect("Pipeline did not drain");
    }
}
