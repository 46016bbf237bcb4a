/// Wires the coordinators to concrete collaborators from configuration.
/// Shared by the CLI commands and the HTTP server.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::backup::BackupCoordinator;
use super::objects::{HttpObjectStore, LocalObjectStore, ObjectStore};
use super::records::{JsonFileRecordStore, RecordStore};
use super::restore::RestoreCoordinator;
use crate::utils::{AppConfig, ObjectStoreConfig};

pub struct BackupEngine {
    pub backup: BackupCoordinator,
    pub restore: RestoreCoordinator,
    pub config: AppConfig,
}

impl BackupEngine {
    pub fn new(config: AppConfig, records: Arc<dyn RecordStore>, objects: Arc<dyn ObjectStore>) -> Self {
        let backup = BackupCoordinator::new(
            records.clone(),
            objects.clone(),
            config.static_dir.clone(),
            config.transfer_concurrency,
        );
        let restore = RestoreCoordinator::new(
            records,
            objects,
            config.scratch_dir.clone(),
            config.transfer_concurrency,
        );

        Self {
            backup,
            restore,
            config,
        }
    }

    /// Build the engine with the stores named in the config
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.ensure_valid()?;

        let records: Arc<dyn RecordStore> = Arc::new(JsonFileRecordStore::new(&config.data_file));
        let objects: Arc<dyn ObjectStore> = match &config.object_store {
            ObjectStoreConfig::Http { base_url } => Arc::new(
                HttpObjectStore::new(base_url.clone()).context("Failed to create object store client")?,
            ),
            ObjectStoreConfig::Local { root } => Arc::new(LocalObjectStore::new(root)),
        };

        Ok(Self::new(config, records, objects))
    }
}
