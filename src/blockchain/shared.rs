//! Single-writer access to a [`Ledger`].
//!
//! Appends are serialized by a writer mutex held from candidate construction
//! until the record is pushed, so two appends can never read the same tail.
//! The ledger itself sits behind a read/write lock that is only taken briefly:
//! to build the candidate, to push the sealed record and for reads. Mining
//! runs with no lock on the records, so readers never wait for a search.

use crate::blockchain::chain::Ledger;
use crate::blockchain::record::{Payload, Record};
use crate::blockchain::validation::{first_insufficient_work, first_violation, ChainViolation};
use crate::error::{LedgerError, Result};
use crate::miner::{mine_with_cancel, CancelToken};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SharedLedger {
    ledger: Arc<RwLock<Ledger>>,
    writer: Arc<Mutex<()>>,
}

/// Cancels the wrapped token when the awaiting future goes away.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        SharedLedger {
            ledger: Arc::new(RwLock::new(ledger)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Mine and append on the calling thread.
    ///
    /// `commit` runs after mining and before the push, still inside the
    /// writer slot. If it fails the record is dropped.
    pub fn append_blocking<F>(&self, payload: Payload, cancel: &CancelToken, commit: F) -> Result<Record>
    where
        F: FnOnce(u64, &Record) -> Result<()>,
    {
        let _writer = self.writer.lock();
        let (candidate, difficulty, height) = {
            let ledger = self.ledger.read();
            (ledger.candidate(payload), ledger.difficulty(), ledger.next_height())
        };

        let record = mine_with_cancel(candidate, difficulty, cancel)?;
        commit(height, &record)?;
        self.ledger.write().push_sealed(record.clone())?;
        Ok(record)
    }

    /// Mine and append on the blocking thread pool.
    ///
    /// `timeout` bounds the whole call, including time spent waiting for the
    /// writer slot. Dropping the returned future cancels the search.
    pub async fn append<F>(&self, payload: Payload, timeout: Option<Duration>, commit: F) -> Result<Record>
    where
        F: FnOnce(u64, &Record) -> Result<()> + Send + 'static,
    {
        let token = match timeout {
            Some(timeout) => CancelToken::with_deadline(timeout),
            None => CancelToken::new(),
        };
        let _guard = CancelOnDrop(token.clone());
        let shared = self.clone();

        tokio::task::spawn_blocking(move || shared.append_blocking(payload, &token, commit))
            .await
            .map_err(|e| LedgerError::WorkerError(e.to_string()))?
    }

    /// Copy of the records appended so far.
    pub fn snapshot(&self) -> Vec<Record> {
        self.ledger.read().records().to_vec()
    }

    pub fn validate(&self) -> bool {
        self.first_violation().is_none()
    }

    pub fn first_violation(&self) -> Option<ChainViolation> {
        first_violation(&self.snapshot())
    }

    pub fn audit_work(&self) -> Option<usize> {
        let (records, difficulty) = {
            let ledger = self.ledger.read();
            (ledger.records().to_vec(), ledger.difficulty())
        };
        first_insufficient_work(&records, difficulty)
    }

    pub fn len(&self) -> usize {
        self.ledger.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.read().is_empty()
    }

    pub fn get(&self, height: usize) -> Option<Record> {
        self.ledger.read().get(height).cloned()
    }

    pub fn tail(&self) -> Record {
        self.ledger.read().tail().clone()
    }

    pub fn difficulty(&self) -> u32 {
        self.ledger.read().difficulty()
    }
}
