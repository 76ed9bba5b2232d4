use crate::blockchain::record::{Candidate, Payload, Record};
use crate::blockchain::validation::{first_insufficient_work, first_violation, validate_chain, ChainViolation};
use crate::error::{LedgerError, Result};
use crate::miner::{check_difficulty, mine_with_cancel, CancelToken};

/// Append-only sequence of sealed records, index 0 being genesis.
///
/// A `Ledger` has no internal locking. Appends read the tail and then extend
/// it, so concurrent writers must go through [`crate::blockchain::SharedLedger`]
/// or some other exclusive access.
#[derive(Debug, Clone)]
pub struct Ledger {
    genesis: Record,
    records: Vec<Record>,
    difficulty: u32,
}

impl Ledger {
    /// Create a ledger holding only the genesis record.
    pub fn new(difficulty: u32) -> Result<Self> {
        check_difficulty(difficulty)?;
        let genesis = Record::genesis();
        Ok(Ledger {
            records: vec![genesis.clone()],
            genesis,
            difficulty,
        })
    }

    /// Restore a previously persisted sequence without re-mining.
    ///
    /// Only the genesis record is checked here; run [`Ledger::validate`] on the
    /// result before trusting it.
    pub fn from_records(records: Vec<Record>, difficulty: u32) -> Result<Self> {
        check_difficulty(difficulty)?;
        match records.first() {
            None => Err(LedgerError::InvalidGenesis("record sequence is empty".to_string())),
            Some(first) if !first.is_genesis() => Err(LedgerError::InvalidGenesis(format!(
                "first record has digest {} and previous digest {}",
                first.digest, first.previous_digest
            ))),
            Some(_) => Ok(Ledger {
                genesis: Record::genesis(),
                records,
                difficulty,
            }),
        }
    }

    pub fn genesis(&self) -> &Record {
        &self.genesis
    }

    pub fn tail(&self) -> &Record {
        self.records.last().unwrap_or(&self.genesis)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, height: usize) -> Option<&Record> {
        self.records.get(height)
    }

    /// Number of records including genesis.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Height the next appended record will occupy.
    pub fn next_height(&self) -> u64 {
        self.records.len() as u64
    }

    /// A candidate linked to the current tail, timestamped now.
    pub fn candidate(&self, payload: Payload) -> Candidate {
        Candidate::new(self.tail().digest.clone(), payload)
    }

    pub fn append(&mut self, payload: Payload) -> Result<Record> {
        self.append_with_cancel(payload, &CancelToken::new())
    }

    pub fn append_with_cancel(&mut self, payload: Payload, cancel: &CancelToken) -> Result<Record> {
        self.append_with_commit(payload, cancel, |_, _| Ok(()))
    }

    /// Mine and append, handing the sealed record to `commit` first.
    ///
    /// `commit` receives the height the record will occupy. If mining is
    /// cancelled or `commit` fails, the record is dropped and the ledger is
    /// left exactly as it was.
    pub fn append_with_commit<F>(&mut self, payload: Payload, cancel: &CancelToken, commit: F) -> Result<Record>
    where
        F: FnOnce(u64, &Record) -> Result<()>,
    {
        let candidate = self.candidate(payload);
        let record = mine_with_cancel(candidate, self.difficulty, cancel)?;
        commit(self.next_height(), &record)?;
        self.push_sealed(record.clone())?;
        Ok(record)
    }

    /// Push a record mined elsewhere. It must link to the current tail.
    pub fn push_sealed(&mut self, record: Record) -> Result<()> {
        if record.previous_digest != self.tail().digest {
            return Err(LedgerError::ChainIntegrity(format!(
                "record {} does not link to tail {}",
                record.digest,
                self.tail().digest
            )));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn validate(&self) -> bool {
        validate_chain(&self.records)
    }

    pub fn first_violation(&self) -> Option<ChainViolation> {
        first_violation(&self.records)
    }

    /// First record whose digest does not meet this ledger's difficulty.
    pub fn audit_work(&self) -> Option<usize> {
        first_insufficient_work(&self.records, self.difficulty)
    }
}
