//! REST API surface and shared request context.

pub mod rest;
pub mod wire;

pub use rest::RestApi;

use tracing::error;

use crate::config::Config;
use crate::error::PersistenceError;
use crate::grid::LabelTable;
use crate::storage::{Persistence, Store};

/// Everything a request handler needs: the store, the snapshot manager,
/// the label table and the loaded configuration.
pub struct AppContext {
    pub store: Store,
    pub persistence: Option<Persistence>,
    pub labels: LabelTable,
    pub config: Config,
}

impl AppContext {
    pub fn new(config: Config, store: Store, persistence: Option<Persistence>) -> Self {
        let labels = LabelTable::with_defaults(config.labels.clone());
        AppContext {
            store,
            persistence,
            labels,
            config,
        }
    }

    /// Persist a snapshot after a mutating request, when configured.
    /// Failures are logged, never surfaced to the client that already got
    /// its committed write.
    pub fn snapshot_after_write(&self) {
        if !self.config.storage.snapshot_on_write {
            return;
        }
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.save(&self.store.export_tables()) {
            error!(error = %e, "no se pudo guardar el snapshot");
        }
    }

    /// Final snapshot on shutdown.
    pub fn snapshot_final(&self) -> Result<(), PersistenceError> {
        match &self.persistence {
            Some(persistence) => persistence.save(&self.store.export_tables()),
            None => Ok(()),
        }
    }
}
