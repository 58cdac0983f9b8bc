//! Run fingerprinting: deterministic identification of a simulation run.
//!
//! - `params_hash`: BLAKE3 of the canonical JSON of the parameters.
//! - `RunId`: parameters hash + dataset hash.
//! - `RunFingerprint`: the record saved next to a run's artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DatasetHash, RunId};
use crate::params::SimulationParameters;

/// Hash of every parameter value.
///
/// Struct fields serialize in declaration order, so the JSON is canonical.
pub fn params_hash(params: &SimulationParameters) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(params)?;
    Ok(blake3::hash(&json).to_hex().to_string())
}

/// Complete fingerprint of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFingerprint {
    // ── Identity ──
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,

    // ── Configuration ──
    pub params: SimulationParameters,

    // ── Derived hashes ──
    pub params_hash: String,
    pub dataset_hash: DatasetHash,
}

impl RunFingerprint {
    pub fn new(
        params: &SimulationParameters,
        dataset_hash: DatasetHash,
    ) -> Result<Self, serde_json::Error> {
        let params_hash = params_hash(params)?;
        Ok(Self {
            run_id: RunId::derive(&params_hash, &dataset_hash),
            created_at: Utc::now(),
            params: params.clone(),
            params_hash,
            dataset_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> DatasetHash {
        DatasetHash("abc".into())
    }

    #[test]
    fn run_id_is_deterministic() {
        let params = SimulationParameters::default();
        let a = RunFingerprint::new(&params, dataset()).unwrap();
        let b = RunFingerprint::new(&params, dataset()).unwrap();
        assert_eq!(a.run_id, b.run_id);
        assert_eq!(a.params_hash, b.params_hash);
    }

    #[test]
    fn run_id_tracks_params_and_data() {
        let params = SimulationParameters::default();
        let base = RunFingerprint::new(&params, dataset()).unwrap();

        let mut changed = params.clone();
        changed.bid_ask_penalty = 2.0;
        let other = RunFingerprint::new(&changed, dataset()).unwrap();
        assert_ne!(base.run_id, other.run_id);

        let other_data = RunFingerprint::new(&params, DatasetHash("def".into())).unwrap();
        assert_ne!(base.run_id, other_data.run_id);
        assert_eq!(base.params_hash, other_data.params_hash);
    }

    #[test]
    fn fingerprint_serializes() {
        let fp = RunFingerprint::new(&SimulationParameters::default(), dataset()).unwrap();
        let json = serde_json::to_string(&fp).unwrap();
        let back: RunFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }
}
