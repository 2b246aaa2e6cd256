//! Per-contract sequence assignment at the source boundary.

use std::collections::HashMap;

use crate::domain::event::ContractId;

/// Hands out monotonically increasing sequence numbers per contract.
///
/// Records that carry their own sequence keep it; the counter then resumes
/// after the highest sequence seen for that contract.
#[derive(Debug, Default)]
pub struct SequenceAssigner {
    last: HashMap<ContractId, u64>,
}

impl SequenceAssigner {
    /// Empty assigner; the first sequence for each contract is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence for the next record of `contract_id`.
    pub fn assign(&mut self, contract_id: &ContractId, explicit: Option<u64>) -> u64 {
        let last = self.last.entry(contract_id.clone()).or_insert(0);
        let sequence = explicit.unwrap_or(*last + 1);
        *last = (*last).max(sequence);
        sequence
    }
}
