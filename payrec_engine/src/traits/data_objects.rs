use serde::{Deserialize, Serialize};

/// Tally of one backfill sweep. Failures are per-transaction and independent; a failed lookup leaves the
/// transaction for the next sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepResult {
    pub checked: usize,
    pub accepted: usize,
    pub superseded: usize,
    pub rejected: usize,
    pub failures: usize,
}

impl SweepResult {
    pub fn total(&self) -> usize {
        self.checked
    }
}
