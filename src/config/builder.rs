//! Engine assembly from configuration.
//!
//! [`EngineBuilder`] turns a [`ReconConfig`] into a ready [`PipelineEngine`]:
//! it picks the store backend, applies the invocation timeout, and carries
//! tool paths, completion overrides and the malformed-line policy into the
//! engine settings.

use std::path::PathBuf;
use std::sync::Arc;

use super::error::ConfigError;
use super::types::{ReconConfig, StorageConfig};
use super::yaml::YamlLoader;
use crate::events::EventBus;
use crate::execution::{EngineSettings, PipelineEngine, ProcessInvoker, ToolInvoker};
use crate::storage::{InMemoryStore, MemoryConnector, StoreConnector};

/// Builds a [`PipelineEngine`] from configuration.
pub struct EngineBuilder {
    config: ReconConfig,
    db_location: Option<PathBuf>,
    invoker: Option<Arc<dyn ToolInvoker>>,
    connector: Option<Arc<dyn StoreConnector>>,
    events: Option<Arc<EventBus>>,
}

impl EngineBuilder {
    /// Start from a loaded configuration.
    pub fn new(config: ReconConfig) -> Self {
        Self {
            config,
            db_location: None,
            invoker: None,
            connector: None,
            events: None,
        }
    }

    /// Store location, overriding `db_location` from the file.
    pub fn db_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_location = Some(path.into());
        self
    }

    /// Use `invoker` instead of spawning real processes.
    pub fn invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Use `connector` instead of the configured backend.
    pub fn connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Attach an event bus.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Settings the engine will run with.
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            tools: self.config.tools.clone(),
            malformed_lines: self.config.malformed_lines,
            completion: self.config.completion.clone(),
        }
    }

    /// Validate and assemble the engine.
    pub fn build(self) -> Result<PipelineEngine, ConfigError> {
        YamlLoader::validate_config(&self.config)?;
        let settings = self.settings();

        let invoker = match self.invoker {
            Some(invoker) => invoker,
            None => {
                let mut process = ProcessInvoker::new();
                if let Some(timeout) = self.config.invocation_timeout() {
                    process = process.with_timeout(timeout);
                }
                Arc::new(process)
            }
        };

        let connector = match self.connector {
            Some(connector) => connector,
            None => {
                let db_location = self.db_location.or_else(|| self.config.db_location.clone());
                connector_for(self.config.storage, db_location)?
            }
        };

        let engine = PipelineEngine::new(connector, invoker, settings);
        Ok(match self.events {
            Some(events) => engine.with_events(events),
            None => engine,
        })
    }
}

fn connector_for(
    storage: StorageConfig,
    db_location: Option<PathBuf>,
) -> Result<Arc<dyn StoreConnector>, ConfigError> {
    match storage {
        StorageConfig::Memory => Ok(Arc::new(MemoryConnector::new(Arc::new(
            InMemoryStore::new(),
        )))),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite => {
            let path = db_location.ok_or_else(|| ConfigError::MissingField("db_location".into()))?;
            Ok(Arc::new(crate::storage::SqliteConnector::new(path)))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite => {
            let _ = db_location;
            Err(ConfigError::InvalidConfig(
                "sqlite storage requires the 'sqlite' feature".into(),
            ))
        }
    }
}
