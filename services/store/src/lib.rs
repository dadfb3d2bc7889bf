//! Lumen Store - document store adapter
//!
//! Keyed access to the two Lumen collections in PostgreSQL:
//!
//! - `processing_results` - enrichment output written by the analysis
//!   service and read by the gateway's query surface
//! - `audit_log` - append-only entries written by the audit service
//!
//! The collections are independent; writers never touch each other's rows
//! and every write is keyed by an id unique per ingestion, so no
//! cross-request locking exists anywhere in this crate.

pub mod audit;
pub mod config;
pub mod error;
pub mod results;

pub use audit::{AuditEntry, AuditSink, AuditStore};
pub use config::DatabaseConfig;
pub use error::StoreError;
pub use results::{
    NewProcessingResult, ResultIndex, ResultSink, ResultStore, StoredProcessingResult,
};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

// Re-exported so dependents can name sqlx types without a direct dependency.
pub use sqlx;

/// Shared connection to the document store
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Open a connection pool against the configured database
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL document store");

        Ok(Self { pool })
    }

    /// Run embedded migrations
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running document store migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Document store migrations completed");
        Ok(())
    }

    /// Handle to the processing-results collection
    pub fn results(&self) -> ResultStore {
        ResultStore::new(self.pool.clone())
    }

    /// Handle to the audit-log collection
    pub fn audit(&self) -> AuditStore {
        AuditStore::new(self.pool.clone())
    }

    /// The underlying pool (for readiness probes)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
