//! ============================================================================
//! Snapshot Store Types - Serializable summaries for the redb store
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate view of the persisted snapshots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_snapshots: usize,
    /// Snapshots still within the staleness bound used for the query
    pub fresh_snapshots: usize,
    pub distinct_wallets: usize,
    /// Counts keyed by token standard ("ERC20" / "NFT")
    pub by_standard: HashMap<String, usize>,
    /// Oldest `fetched_at` across all snapshots, if any
    pub oldest_fetched_at: Option<i64>,
}
