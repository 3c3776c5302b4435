//! Content digests for ledger anchoring.
//!
//! A digest is Keccak-256 over a canonical JSON rendering of the payload: object keys
//! sorted at every depth, no whitespace, decimals normalised, timestamps in RFC 3339 UTC
//! with microsecond precision. Equal payloads hash equal regardless of how the caller
//! ordered its fields.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha3::{Digest as _, Keccak256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("payload is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

/// 256-bit content digest, rendered as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| HashError::InvalidDigest(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidDigest(format!("expected 32 bytes: {}", s)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hash any serializable payload into its canonical digest.
pub fn commit<T: Serialize + ?Sized>(payload: &T) -> Result<Digest, HashError> {
    let value = serde_json::to_value(payload)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical)?;

    let mut hasher = Keccak256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();

    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    Ok(Digest::from_bytes(out))
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), HashError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

pub fn canonical_decimal(d: Decimal) -> String {
    d.normalize().to_string()
}

pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Fields anchored for a tender.
#[derive(Debug, Clone, Serialize)]
pub struct TenderCommitment {
    pub title: String,
    pub description: String,
    pub budget: String,
    pub deadline: String,
    pub requirements: String,
    pub creator_id: String,
    pub created_at: String,
}

impl TenderCommitment {
    pub fn new(
        title: &str,
        description: &str,
        budget: Decimal,
        deadline: DateTime<Utc>,
        requirements: &str,
        creator_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            budget: canonical_decimal(budget),
            deadline: canonical_timestamp(deadline),
            requirements: requirements.to_string(),
            creator_id: creator_id.hyphenated().to_string(),
            created_at: canonical_timestamp(created_at),
        }
    }
}

/// Fields anchored for a bid.
#[derive(Debug, Clone, Serialize)]
pub struct BidCommitment {
    pub tender_id: String,
    pub bidder_id: String,
    pub amount: String,
    pub submitted_at: String,
}

impl BidCommitment {
    pub fn new(
        tender_id: Uuid,
        bidder_id: Uuid,
        amount: Decimal,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tender_id: tender_id.hyphenated().to_string(),
            bidder_id: bidder_id.hyphenated().to_string(),
            amount: canonical_decimal(amount),
            submitted_at: canonical_timestamp(submitted_at),
        }
    }
}
