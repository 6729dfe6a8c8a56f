//! The persisted residency budget record, spec §6: a single host-storage
//! record clamped to `[256 MiB, 5 GiB]` with a `512 MiB` default.

use serde::{Deserialize, Serialize};

pub const MIN_BUDGET_BYTES: u64 = 256 * 1024 * 1024;
pub const MAX_BUDGET_BYTES: u64 = 5 * 1024 * 1024 * 1024;
pub const DEFAULT_BUDGET_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidencyBudgetRecord {
    pub version: u32,
    #[serde(rename = "maxAllocationBytes")]
    pub max_allocation_bytes: u64,
    #[serde(rename = "budgetBytes")]
    pub budget_bytes: u64,
    pub ratio: f32,
    #[serde(rename = "sampledAtMs")]
    pub sampled_at_ms: u64,
}

impl ResidencyBudgetRecord {
    /// Builds a record from a sampled device allocation budget, clamping to
    /// `[256 MiB, 5 GiB]` and defaulting to `512 MiB` when the sample is
    /// zero or otherwise degenerate.
    pub fn from_sample(max_allocation_bytes: u64, ratio: f32, sampled_at_ms: u64) -> Self {
        let raw_budget = (max_allocation_bytes as f64 * ratio as f64) as u64;
        let budget_bytes = clamp_budget(raw_budget);
        Self {
            version: 1,
            max_allocation_bytes,
            budget_bytes,
            ratio,
            sampled_at_ms,
        }
    }

    /// Parses a persisted JSON record, clamping the budget back into range
    /// in case it was written by a different policy or is corrupt.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut record: ResidencyBudgetRecord = serde_json::from_str(json)?;
        record.budget_bytes = clamp_budget(record.budget_bytes);
        Ok(record)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Clamps a raw byte budget into `[256 MiB, 5 GiB]`, falling back to the
/// `512 MiB` default for a zero (unset/corrupt) input.
pub fn clamp_budget(raw: u64) -> u64 {
    if raw == 0 {
        return DEFAULT_BUDGET_BYTES;
    }
    raw.clamp(MIN_BUDGET_BYTES, MAX_BUDGET_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sample_falls_back_to_default() {
        assert_eq!(clamp_budget(0), DEFAULT_BUDGET_BYTES);
    }

    #[test]
    fn under_minimum_clamps_up() {
        assert_eq!(clamp_budget(1), MIN_BUDGET_BYTES);
    }

    #[test]
    fn over_maximum_clamps_down() {
        assert_eq!(clamp_budget(u64::MAX), MAX_BUDGET_BYTES);
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let record = ResidencyBudgetRecord::from_sample(4 * 1024 * 1024 * 1024, 0.25, 1_700_000_000);
        let json = record.to_json().unwrap();
        assert!(json.contains("\"maxAllocationBytes\""));
        let parsed = ResidencyBudgetRecord::from_json(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn corrupt_persisted_budget_is_reclamped_on_load() {
        let json = r#"{"version":1,"maxAllocationBytes":0,"budgetBytes":1,"ratio":0.5,"sampledAtMs":0}"#;
        let record = ResidencyBudgetRecord::from_json(json).unwrap();
        assert_eq!(record.budget_bytes, MIN_BUDGET_BYTES);
    }
}
