use crate::blockchain::{Ledger, SharedLedger};
use crate::config::Config;
use crate::error::{LedgerError, Result};
use crate::persistence::{Database, InMemoryPersistence, Persistence};
use std::fs;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The running service: configuration, document store and the ledger, owned
/// together and handed to the API at start-up.
pub struct Node {
    pub config: Config,
    pub persistence: Arc<dyn Persistence>,
    pub ledger: SharedLedger,
}

impl Node {
    /// Open the configured database and rehydrate the ledger from it.
    pub fn init(config: Config) -> Result<Self> {
        let db_path = std::path::Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let persistence: Arc<dyn Persistence> = match Database::open(&config.database.path) {
            Ok(db) => Arc::new(db),
            Err(e) => {
                warn!(
                    "Failed to open DB at {}: {}. Falling back to in-memory persistence.",
                    config.database.path, e
                );
                Arc::new(InMemoryPersistence::new())
            }
        };

        Self::with_persistence(config, persistence)
    }

    /// Build a node on top of an existing store.
    ///
    /// An empty store gets a fresh ledger with its genesis persisted. A stored
    /// chain is restored without re-mining and must pass validation.
    pub fn with_persistence(config: Config, persistence: Arc<dyn Persistence>) -> Result<Self> {
        let difficulty = config.ledger.difficulty;
        let records = persistence.load_records()?;

        let ledger = if records.is_empty() {
            let ledger = Ledger::new(difficulty)?;
            persistence.save_record(0, ledger.genesis())?;
            info!("Created new ledger (difficulty = {})", difficulty);
            ledger
        } else {
            let ledger = Ledger::from_records(records, difficulty)?;
            if let Some(violation) = ledger.first_violation() {
                error!("Stored ledger failed validation: {}", violation);
                return Err(LedgerError::ChainIntegrity(violation.to_string()));
            }
            if let Some(index) = ledger.audit_work() {
                warn!(
                    "Record {} was sealed below the configured difficulty {}",
                    index, difficulty
                );
            }
            info!("Restored ledger with {} records", ledger.len());
            ledger
        };

        Ok(Node {
            config,
            persistence,
            ledger: SharedLedger::new(ledger),
        })
    }

    #[cfg(feature = "api")]
    pub async fn start(self: Arc<Self>) -> std::result::Result<(), Box<dyn std::error::Error>> {
        crate::api::run_api_server(self).await
    }

    #[cfg(not(feature = "api"))]
    pub async fn start(self: Arc<Self>) -> std::result::Result<(), Box<dyn std::error::Error>> {
        Err("API feature not enabled in this build".into())
    }
}
