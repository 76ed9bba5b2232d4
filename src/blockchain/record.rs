//! Ledger records and their canonical hash input.
//!
//! A record's digest is the SHA-256 of `previous_digest`, the canonical payload
//! JSON, the canonical timestamp and the decimal nonce, concatenated with no
//! separators. Miner and validator both go through [`seal_hasher`], so the
//! bytes a miner hashed are reproduced exactly when the chain is re-checked.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Sentinel used as both digest and previous digest of the genesis record.
pub const GENESIS_DIGEST: &str = "0";

/// A float known to be finite.
///
/// NaN and the infinities have no JSON form, so they are refused at
/// construction and again when decoding stored payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct FiniteFloat(f64);

impl FiniteFloat {
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then_some(FiniteFloat(value))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for FiniteFloat {
    type Error = String;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        FiniteFloat::new(value).ok_or_else(|| format!("non-finite float {} in payload", value))
    }
}

impl From<FiniteFloat> for f64 {
    fn from(value: FiniteFloat) -> Self {
        value.0
    }
}

/// A primitive payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Text(String),
    Integer(i64),
    Float(FiniteFloat),
}

impl PayloadValue {
    /// Builds a float value, refusing NaN and infinities.
    pub fn float(value: f64) -> Option<Self> {
        FiniteFloat::new(value).map(PayloadValue::Float)
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            PayloadValue::Text(s) => serde_json::Value::String(s.clone()),
            PayloadValue::Integer(i) => serde_json::Value::from(*i),
            PayloadValue::Float(f) => serde_json::Value::from(f.get()),
        }
    }
}

impl From<FiniteFloat> for PayloadValue {
    fn from(value: FiniteFloat) -> Self {
        PayloadValue::Float(value)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Text(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::Text(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Integer(value)
    }
}

impl From<i32> for PayloadValue {
    fn from(value: i32) -> Self {
        PayloadValue::Integer(value as i64)
    }
}

impl From<u32> for PayloadValue {
    fn from(value: u32) -> Self {
        PayloadValue::Integer(value as i64)
    }
}

/// Opaque key/value data carried by a record.
///
/// Keys are kept sorted, which is what makes [`Payload::canonical_json`] stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PayloadValue>,
    ) -> Option<PayloadValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact JSON object with keys in ascending byte order.
    pub fn canonical_json(&self) -> String {
        let object: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(object).to_string()
    }
}

impl<K: Into<String>, V: Into<PayloadValue>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Payload(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// RFC 3339, nanosecond precision, `Z` suffix.
pub fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Hasher primed with every input field except the nonce.
pub fn seal_hasher(previous_digest: &str, payload: &Payload, timestamp: &DateTime<Utc>) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(previous_digest.as_bytes());
    hasher.update(payload.canonical_json().as_bytes());
    hasher.update(canonical_timestamp(timestamp).as_bytes());
    hasher
}

/// Finishes a primed hasher with `nonce` and renders lowercase hex.
pub fn digest_with_nonce(primed: &Sha256, nonce: u64) -> String {
    let mut hasher = primed.clone();
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn compute_digest(
    previous_digest: &str,
    payload: &Payload,
    timestamp: &DateTime<Utc>,
    nonce: u64,
) -> String {
    digest_with_nonce(&seal_hasher(previous_digest, payload, timestamp), nonce)
}

/// An unsealed record: linked to a tail and timestamped, but not yet mined.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub previous_digest: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl Candidate {
    /// Freezes the current time as the candidate's timestamp.
    pub fn new(previous_digest: impl Into<String>, payload: Payload) -> Self {
        Self::at(previous_digest, payload, Utc::now())
    }

    pub fn at(previous_digest: impl Into<String>, payload: Payload, timestamp: DateTime<Utc>) -> Self {
        Candidate {
            previous_digest: previous_digest.into(),
            payload,
            timestamp,
        }
    }
}

/// A sealed ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub payload: Payload,
    pub previous_digest: String,
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
    pub digest: String,
}

impl Record {
    /// The fixed first record shared by every ledger.
    pub fn genesis() -> Self {
        Record {
            payload: Payload::new(),
            previous_digest: GENESIS_DIGEST.to_string(),
            timestamp: Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
            nonce: 0,
            digest: GENESIS_DIGEST.to_string(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        *self == Record::genesis()
    }

    pub fn recompute_digest(&self) -> String {
        compute_digest(&self.previous_digest, &self.payload, &self.timestamp, self.nonce)
    }

    /// True when the stored digest matches the one derived from the other fields.
    pub fn has_consistent_digest(&self) -> bool {
        self.recompute_digest() == self.digest
    }

    pub fn canonical_timestamp(&self) -> String {
        canonical_timestamp(&self.timestamp)
    }
}
