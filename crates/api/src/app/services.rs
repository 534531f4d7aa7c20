use std::sync::Arc;

use licensedesk_core::Clock;
use licensedesk_infra::{InMemoryStore, LifecycleManager, PostgresStore, StoreError};

use crate::config::StorageConfig;

/// Service wiring shared by every handler.
///
/// Selected once at startup from [`StorageConfig`]; both variants expose the
/// same [`LifecycleManager`] so handlers never branch on the backend.
#[derive(Clone)]
pub enum AppServices {
    InMemory { lifecycle: Arc<LifecycleManager> },
    Persistent { lifecycle: Arc<LifecycleManager> },
}

impl AppServices {
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new(Arc::new(InMemoryStore::new()), clock));
        AppServices::InMemory { lifecycle }
    }

    /// Connect to Postgres and apply pending migrations.
    pub async fn persistent(
        database_url: &str,
        max_connections: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let store = PostgresStore::connect(database_url, max_connections).await?;
        store.migrate().await?;
        let lifecycle = Arc::new(LifecycleManager::new(Arc::new(store), clock));
        Ok(AppServices::Persistent { lifecycle })
    }

    pub async fn from_config(storage: &StorageConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        match storage {
            StorageConfig::InMemory => {
                tracing::info!("using in-memory stores");
                Ok(Self::in_memory(clock))
            }
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                tracing::info!(max_connections, "using postgres stores");
                Self::persistent(database_url, *max_connections, clock).await
            }
        }
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        match self {
            AppServices::InMemory { lifecycle } | AppServices::Persistent { lifecycle } => lifecycle,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AppServices::InMemory { .. } => "in_memory",
            AppServices::Persistent { .. } => "postgres",
        }
    }
}
