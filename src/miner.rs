//! Proof-of-work search.
//!
//! Mining consumes a [`Candidate`] and returns a new sealed [`Record`]. The
//! search is CPU-bound and unbounded; callers that need a latency bound pass a
//! [`CancelToken`], which is checked after every nonce increment.

use crate::blockchain::record::{digest_with_nonce, seal_hasher, Candidate, Record};
use crate::error::{LedgerError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A hex digest has 64 characters; no difficulty above that can be met.
pub const MAX_DIFFICULTY: u32 = 64;

/// Shared cancellation signal, optionally with a deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that is only triggered by [`CancelToken::cancel`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also fires once `timeout` has elapsed from now.
    pub fn with_deadline(timeout: Duration) -> Self {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

/// True when `digest` starts with `difficulty` `'0'` characters.
pub fn meets_difficulty(digest: &str, difficulty: u32) -> bool {
    let wanted = difficulty as usize;
    digest.len() >= wanted && digest.bytes().take(wanted).all(|b| b == b'0')
}

pub fn check_difficulty(difficulty: u32) -> Result<()> {
    if difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::DifficultyOutOfRange(difficulty));
    }
    Ok(())
}

/// Mines without a cancellation signal.
pub fn mine(candidate: Candidate, difficulty: u32) -> Result<Record> {
    mine_with_cancel(candidate, difficulty, &CancelToken::new())
}

/// Mines `candidate`, aborting with [`LedgerError::MiningAborted`] once `cancel` fires.
pub fn mine_with_cancel(candidate: Candidate, difficulty: u32, cancel: &CancelToken) -> Result<Record> {
    check_difficulty(difficulty)?;

    let primed = seal_hasher(&candidate.previous_digest, &candidate.payload, &candidate.timestamp);
    let mut nonce: u64 = 0;
    let mut digest = digest_with_nonce(&primed, nonce);

    while !meets_difficulty(&digest, difficulty) {
        nonce = nonce.checked_add(1).ok_or(LedgerError::NonceExhausted)?;
        if cancel.is_cancelled() {
            return Err(LedgerError::MiningAborted { attempts: nonce });
        }
        digest = digest_with_nonce(&primed, nonce);
    }

    Ok(Record {
        payload: candidate.payload,
        previous_digest: candidate.previous_digest,
        timestamp: candidate.timestamp,
        nonce,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::record::{Payload, GENESIS_DIGEST};

    fn candidate() -> Candidate {
        Candidate::new(
            GENESIS_DIGEST,
            Payload::new().with("from", "A").with("to", "B").with("amount", 10),
        )
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 0));
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("00ab", 3));
        assert!(!meets_difficulty("0", 2));
        assert!(meets_difficulty("", 0));
    }

    #[test]
    fn test_difficulty_zero_takes_first_nonce() {
        let c = candidate();
        let record = mine(c.clone(), 0).unwrap();
        assert_eq!(record.nonce, 0);
        assert_eq!(record.timestamp, c.timestamp);
        assert!(record.has_consistent_digest());
    }

    #[test]
    fn test_mined_record_meets_difficulty() {
        for difficulty in 0..=3 {
            let record = mine(candidate(), difficulty).unwrap();
            assert!(meets_difficulty(&record.digest, difficulty));
            assert!(record.has_consistent_digest());
            assert_eq!(record.previous_digest, GENESIS_DIGEST);
        }
    }

    #[test]
    fn test_out_of_range_difficulty() {
        assert_eq!(
            mine(candidate(), MAX_DIFFICULTY + 1),
            Err(LedgerError::DifficultyOutOfRange(MAX_DIFFICULTY + 1))
        );
    }

    #[test]
    fn test_cancelled_token_aborts() {
        let token = CancelToken::new();
        token.cancel();
        // 64 leading zeros is never reached, so only cancellation can end the search.
        let result = mine_with_cancel(candidate(), MAX_DIFFICULTY, &token);
        assert_eq!(result, Err(LedgerError::MiningAborted { attempts: 1 }));
    }

    #[test]
    fn test_deadline_aborts() {
        let token = CancelToken::with_deadline(Duration::from_millis(20));
        let result = mine_with_cancel(candidate(), MAX_DIFFICULTY, &token);
        assert!(matches!(result, Err(LedgerError::MiningAborted { .. })));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_does_not_affect_quick_success() {
        let token = CancelToken::new();
        token.cancel();
        // Difficulty 0 is satisfied before the first check.
        assert!(mine_with_cancel(candidate(), 0, &token).is_ok());
    }
}
