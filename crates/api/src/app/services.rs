//! Store selection and service wiring.

use std::sync::Arc;

use anyhow::Context;

use formgate_access::ResolverOptions;
use formgate_infra::{AccessService, AccessStore, AppConfig, InMemoryAccessStore, PostgresAccessStore};

/// Store handle shared by every request.
pub type SharedStore = Arc<dyn AccessStore>;

pub struct AppServices {
    pub access: AccessService<SharedStore>,
}

impl AppServices {
    pub fn new(store: SharedStore, options: ResolverOptions) -> Self {
        Self {
            access: AccessService::new(store, options),
        }
    }

    /// In-memory store, used when no database is configured and in tests.
    pub fn in_memory(store: Arc<InMemoryAccessStore>, options: ResolverOptions) -> Self {
        Self::new(store, options)
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let options = ResolverOptions {
        honor_bootstrap_owner: config.bootstrap_owner_is_admin,
    };

    let store: SharedStore = match &config.database {
        Some(db) => {
            let store = PostgresAccessStore::connect(
                &db.url,
                db.max_connections,
                db.statement_timeout_ms,
            )
            .await
            .context("failed to connect to postgres")?;
            store.migrate().await.context("failed to apply schema")?;
            tracing::info!(max_connections = db.max_connections, "using postgres access store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory access store");
            Arc::new(InMemoryAccessStore::new())
        }
    };

    Ok(AppServices::new(store, options))
}
