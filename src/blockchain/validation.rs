use crate::blockchain::record::Record;
use crate::miner::meets_difficulty;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Stored digest differs from the one recomputed from the record's fields.
    DigestMismatch,
    /// `previous_digest` is not the predecessor's digest.
    BrokenLink,
}

/// First place where chain integrity fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainViolation {
    pub index: usize,
    pub kind: ViolationKind,
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ViolationKind::DigestMismatch => write!(f, "record {} digest mismatch", self.index),
            ViolationKind::BrokenLink => write!(f, "record {} does not link to its predecessor", self.index),
        }
    }
}

/// Walks adjacent pairs from index 1 and stops at the first failing record.
/// The digest check runs before the link check for each record.
pub fn first_violation(records: &[Record]) -> Option<ChainViolation> {
    records.windows(2).enumerate().find_map(|(i, pair)| {
        let (prev, curr) = (&pair[0], &pair[1]);
        let index = i + 1;
        if !curr.has_consistent_digest() {
            Some(ChainViolation { index, kind: ViolationKind::DigestMismatch })
        } else if curr.previous_digest != prev.digest {
            Some(ChainViolation { index, kind: ViolationKind::BrokenLink })
        } else {
            None
        }
    })
}

pub fn validate_chain(records: &[Record]) -> bool {
    first_violation(records).is_none()
}

/// Index of the first non-genesis record whose digest misses `difficulty`.
pub fn first_insufficient_work(records: &[Record], difficulty: u32) -> Option<usize> {
    records
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, r)| !meets_difficulty(&r.digest, difficulty))
        .map(|(i, _)| i)
}
