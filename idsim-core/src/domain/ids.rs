use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange order identifier.
///
/// Ids read from replay data are non-negative. Ids the simulator issues for
/// its own orders and for partial-fill residuals are negative, so the two
/// ranges never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub i64);

impl OrderId {
    pub fn is_synthetic(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Issues synthetic order ids: -1, -2, -3, ...
#[derive(Debug, Clone, Default)]
pub struct SyntheticIdGen {
    issued: i64,
}

impl SyntheticIdGen {
    pub fn next_id(&mut self) -> OrderId {
        self.issued += 1;
        OrderId(-self.issued)
    }
}

/// Content hash of every order ingested into a ledger (BLAKE3, hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic run identifier (parameters + dataset).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn derive(config_hash: &str, dataset_hash: &DatasetHash) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(config_hash.as_bytes());
        hasher.update(b":");
        hasher.update(dataset_hash.0.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    /// First 12 hex characters, for directory names and log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_ids_are_negative_and_unique() {
        let mut gen = SyntheticIdGen::default();
        let a = gen.next_id();
        let b = gen.next_id();
        assert_eq!(a, OrderId(-1));
        assert_eq!(b, OrderId(-2));
        assert!(a.is_synthetic());
        assert!(!OrderId(7).is_synthetic());
    }

    #[test]
    fn run_id_is_deterministic() {
        let data = DatasetHash("abc".into());
        assert_eq!(RunId::derive("cfg", &data), RunId::derive("cfg", &data));
        assert_ne!(RunId::derive("cfg", &data), RunId::derive("cfg2", &data));
        assert_eq!(RunId::derive("cfg", &data).short().len(), 12);
    }
}
