// ============================================================================
// SnapshotStore - Embedded Database (redb)
// ============================================================================
// Persistent balance snapshots backing the oracle cache across restarts.
// Default path: ~/.coursegate/snapshots.redb (override via COURSEGATE_DB_PATH)
// ============================================================================

pub mod types;

pub use types::StoreStats;

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::access::{BalanceSnapshot, TokenStandard, WalletIdentity};

// Table definitions
const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Environment variable overriding the default database location
pub const DB_PATH_ENV: &str = "COURSEGATE_DB_PATH";

fn snapshot_key(wallet: &WalletIdentity, token_address: &str, standard: TokenStandard) -> String {
    format!(
        "snapshots:{}:{}:{}",
        wallet,
        token_address.to_lowercase(),
        standard
    )
}

/// Embedded store of the most recent balance snapshot per (wallet, token, standard)
pub struct SnapshotStore {
    db: Database,
    path: PathBuf,
}

impl SnapshotStore {
    /// Open (or create) the store at the given path.
    /// If `path` is None, uses COURSEGATE_DB_PATH or ~/.coursegate/snapshots.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var(DB_PATH_ENV) {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let dir = home.join(".coursegate");
            std::fs::create_dir_all(&dir)
                .map_err(|e| anyhow!("Failed to create .coursegate directory: {}", e))?;
            dir.join("snapshots.redb")
        };

        info!("Opening snapshot store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open snapshot store: {}", e))?;

        // Ensure the table exists by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(SNAPSHOTS)
                .map_err(|e| anyhow!("Failed to create snapshots table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the snapshot for its (wallet, token, standard)
    pub fn store_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<()> {
        let key = snapshot_key(&snapshot.wallet, &snapshot.token_address, snapshot.standard);
        let value = bincode::serialize(snapshot)
            .map_err(|e| anyhow!("Failed to serialize snapshot: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(SNAPSHOTS)
                .map_err(|e| anyhow!("Failed to open snapshots table: {}", e))?;
            table.insert(key.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert snapshot: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored snapshot: {}", key);
        Ok(())
    }

    pub fn get_snapshot(
        &self,
        wallet: &WalletIdentity,
        token_address: &str,
        standard: TokenStandard,
    ) -> Result<Option<BalanceSnapshot>> {
        let key = snapshot_key(wallet, token_address, standard);

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(SNAPSHOTS)
            .map_err(|e| anyhow!("Failed to open snapshots table: {}", e))?;

        match table.get(key.as_str()).map_err(|e| anyhow!("Failed to get snapshot: {}", e))? {
            Some(value) => {
                let snapshot: BalanceSnapshot = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize snapshot: {}", e))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// All snapshots, optionally restricted to one wallet
    pub fn list_snapshots(&self, wallet: Option<&WalletIdentity>) -> Result<Vec<BalanceSnapshot>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(SNAPSHOTS)
            .map_err(|e| anyhow!("Failed to open snapshots table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate snapshots: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let snapshot: BalanceSnapshot = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize snapshot: {}", e))?;

            if let Some(filter) = wallet {
                if &snapshot.wallet == filter {
                    results.push(snapshot);
                }
            } else {
                results.push(snapshot);
            }
        }
        Ok(results)
    }

    fn delete_keys(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let mut removed = 0;
        {
            let mut table = write_txn.open_table(SNAPSHOTS)
                .map_err(|e| anyhow!("Failed to open snapshots table: {}", e))?;
            for key in keys {
                if table.remove(key.as_str())
                    .map_err(|e| anyhow!("Failed to remove snapshot: {}", e))?
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        Ok(removed)
    }

    /// Delete every snapshot for a wallet. Returns the number deleted.
    pub fn remove_wallet(&self, wallet: &WalletIdentity) -> Result<usize> {
        let keys: Vec<String> = self
            .list_snapshots(Some(wallet))?
            .iter()
            .map(|s| snapshot_key(&s.wallet, &s.token_address, s.standard))
            .collect();

        let removed = self.delete_keys(&keys)?;
        if removed > 0 {
            debug!("Removed {} snapshots for wallet {}", removed, wallet);
        }
        Ok(removed)
    }

    /// Snapshots that `prune_older_than(max_age_secs)` would delete
    pub fn snapshots_older_than(&self, max_age_secs: i64) -> Result<Vec<BalanceSnapshot>> {
        let now = chrono::Utc::now().timestamp();
        Ok(self
            .list_snapshots(None)?
            .into_iter()
            .filter(|s| !s.is_fresh(now, max_age_secs))
            .collect())
    }

    /// Delete snapshots at least `max_age_secs` old. Returns the number deleted.
    pub fn prune_older_than(&self, max_age_secs: i64) -> Result<usize> {
        let keys: Vec<String> = self
            .snapshots_older_than(max_age_secs)?
            .iter()
            .map(|s| snapshot_key(&s.wallet, &s.token_address, s.standard))
            .collect();

        let deleted = self.delete_keys(&keys)?;
        if deleted > 0 {
            info!("Pruned {} snapshots older than {}s", deleted, max_age_secs);
        }
        Ok(deleted)
    }

    /// Statistics, counting snapshots younger than `staleness_secs` as fresh
    pub fn stats(&self, staleness_secs: i64) -> Result<StoreStats> {
        let snapshots = self.list_snapshots(None)?;
        let now = chrono::Utc::now().timestamp();

        let mut stats = StoreStats {
            total_snapshots: snapshots.len(),
            ..Default::default()
        };
        let mut wallets = HashSet::new();

        for snapshot in &snapshots {
            if snapshot.is_fresh(now, staleness_secs) {
                stats.fresh_snapshots += 1;
            }
            wallets.insert(snapshot.wallet.clone());
            *stats
                .by_standard
                .entry(snapshot.standard.to_string())
                .or_insert(0usize) += 1;
            stats.oldest_fetched_at = Some(
                stats
                    .oldest_fetched_at
                    .map_or(snapshot.fetched_at, |t| t.min(snapshot.fetched_at)),
            );
        }
        stats.distinct_wallets = wallets.len();

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0xf9a1c3e5b7d9f1a3c5e7b9d1f3a5c7e9b1d3f5a7";
    const NFT: &str = "0x11b2c3d4e5f60718293a4b5c6d7e8f9011223344";

    struct TempStore {
        store: SnapshotStore,
        path: PathBuf,
    }

    impl Drop for TempStore {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn temp_store() -> TempStore {
        let path = std::env::temp_dir().join(format!("coursegate-test-{}.redb", uuid::Uuid::new_v4()));
        let store = SnapshotStore::open(path.to_str()).unwrap();
        TempStore { store, path }
    }

    fn wallet(n: u8) -> WalletIdentity {
        WalletIdentity::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn snapshot(wallet: WalletIdentity, token: &str, standard: TokenStandard, amount: u128, fetched_at: i64) -> BalanceSnapshot {
        BalanceSnapshot {
            wallet,
            token_address: token.to_string(),
            standard,
            amount,
            fetched_at,
        }
    }

    #[test]
    fn test_store_and_get() {
        let temp = temp_store();
        let now = chrono::Utc::now().timestamp();
        let stored = snapshot(wallet(1), TOKEN, TokenStandard::Erc20, u128::MAX, now);
        temp.store.store_snapshot(&stored).unwrap();

        let loaded = temp.store.get_snapshot(&wallet(1), TOKEN, TokenStandard::Erc20).unwrap();
        assert_eq!(loaded, Some(stored));
        assert!(temp.store.get_snapshot(&wallet(1), TOKEN, TokenStandard::Nft).unwrap().is_none());
        assert!(temp.store.get_snapshot(&wallet(2), TOKEN, TokenStandard::Erc20).unwrap().is_none());
    }

    #[test]
    fn test_replace_not_update() {
        let temp = temp_store();
        let now = chrono::Utc::now().timestamp();
        temp.store.store_snapshot(&snapshot(wallet(1), TOKEN, TokenStandard::Erc20, 1, now - 5)).unwrap();
        temp.store.store_snapshot(&snapshot(wallet(1), TOKEN, TokenStandard::Erc20, 2, now)).unwrap();

        assert_eq!(temp.store.list_snapshots(None).unwrap().len(), 1);
        let loaded = temp.store.get_snapshot(&wallet(1), TOKEN, TokenStandard::Erc20).unwrap().unwrap();
        assert_eq!(loaded.amount, 2);
    }

    #[test]
    fn test_remove_wallet() {
        let temp = temp_store();
        let now = chrono::Utc::now().timestamp();
        temp.store.store_snapshot(&snapshot(wallet(1), TOKEN, TokenStandard::Erc20, 1, now)).unwrap();
        temp.store.store_snapshot(&snapshot(wallet(1), NFT, TokenStandard::Nft, 1, now)).unwrap();
        temp.store.store_snapshot(&snapshot(wallet(2), TOKEN, TokenStandard::Erc20, 1, now)).unwrap();

        assert_eq!(temp.store.remove_wallet(&wallet(1)).unwrap(), 2);
        assert_eq!(temp.store.list_snapshots(None).unwrap().len(), 1);
        assert_eq!(temp.store.list_snapshots(Some(&wallet(2))).unwrap().len(), 1);
        assert_eq!(temp.store.remove_wallet(&wallet(1)).unwrap(), 0);
    }

    #[test]
    fn test_prune_and_stats() {
        let temp = temp_store();
        let now = chrono::Utc::now().timestamp();
        temp.store.store_snapshot(&snapshot(wallet(1), TOKEN, TokenStandard::Erc20, 1, now - 3_600)).unwrap();
        temp.store.store_snapshot(&snapshot(wallet(1), NFT, TokenStandard::Nft, 1, now)).unwrap();
        temp.store.store_snapshot(&snapshot(wallet(2), TOKEN, TokenStandard::Erc20, 1, now)).unwrap();

        let stats = temp.store.stats(300).unwrap();
        assert_eq!(stats.total_snapshots, 3);
        assert_eq!(stats.fresh_snapshots, 2);
        assert_eq!(stats.distinct_wallets, 2);
        assert_eq!(stats.by_standard.get("ERC20"), Some(&2));
        assert_eq!(stats.by_standard.get("NFT"), Some(&1));
        assert_eq!(stats.oldest_fetched_at, Some(now - 3_600));

        assert_eq!(temp.store.snapshots_older_than(300).unwrap().len(), 1);
        assert_eq!(temp.store.prune_older_than(300).unwrap(), 1);
        assert_eq!(temp.store.stats(300).unwrap().total_snapshots, 2);
    }
}
