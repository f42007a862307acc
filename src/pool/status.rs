//! Pool Status Module
//!
//! Point-in-time counters describing a pool.

use serde::Serialize;

// == Pool Status ==
/// Snapshot of a pool's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Pool name
    pub name: String,
    /// Open connections plus connections being created
    pub size: usize,
    /// Idle connections ready to lend
    pub available: usize,
    /// Callers queued for a connection
    pub pending: usize,
}

impl PoolStatus {
    /// Connections currently lent out.
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available)
    }
}
