//! ============================================================================
//! Cached Balance Oracle - Snapshot caching with a staleness bound
//! ============================================================================
//! Wraps any oracle so page views don't hit the chain on every request.
//! Only successful reads are cached; failures always reach the caller.
//! An optional `SnapshotStore` persists snapshots across restarts.
//! ============================================================================

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::oracle::{BalanceOracle, OracleError};
use super::types::{BalanceSnapshot, TokenStandard, WalletIdentity};
use crate::db::SnapshotStore;

/// Default staleness bound in seconds (5 minutes)
pub const DEFAULT_STALENESS_SECS: i64 = 300;

/// Maximum number of cached snapshots to prevent unbounded growth
const MAX_CACHE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SnapshotKey {
    wallet: WalletIdentity,
    token_address: String,
    standard: TokenStandard,
}

impl SnapshotKey {
    fn new(wallet: &WalletIdentity, token_address: &str, standard: TokenStandard) -> Self {
        Self {
            wallet: wallet.clone(),
            token_address: token_address.to_lowercase(),
            standard,
        }
    }
}

/// Oracle wrapper that serves snapshots younger than the staleness bound
pub struct CachedBalanceOracle<O> {
    inner: O,
    snapshots: Arc<RwLock<HashMap<SnapshotKey, BalanceSnapshot>>>,
    staleness_secs: i64,
    store: Option<Arc<SnapshotStore>>,
}

impl<O: BalanceOracle> CachedBalanceOracle<O> {
    /// Cache with the default staleness bound
    pub fn new(inner: O) -> Self {
        Self::with_staleness(inner, DEFAULT_STALENESS_SECS)
    }

    /// Cache with a custom staleness bound; 0 disables caching
    pub fn with_staleness(inner: O, staleness_secs: i64) -> Self {
        Self {
            inner,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            staleness_secs,
            store: None,
        }
    }

    /// Write snapshots through to a persistent store and read them back on a miss
    pub fn with_store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn staleness_secs(&self) -> i64 {
        self.staleness_secs
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    async fn cached(&self, key: &SnapshotKey, now: i64) -> Option<BalanceSnapshot> {
        {
            let cache = self.snapshots.read().await;
            if let Some(snapshot) = cache.get(key) {
                if snapshot.is_fresh(now, self.staleness_secs) {
                    debug!(
                        "Cache hit for {} on {} (age: {}s)",
                        key.wallet,
                        key.token_address,
                        snapshot.age_secs(now)
                    );
                    return Some(snapshot.clone());
                }
            }
        }

        let store = self.store.as_ref()?;
        match store.get_snapshot(&key.wallet, &key.token_address, key.standard) {
            Ok(Some(snapshot)) if snapshot.is_fresh(now, self.staleness_secs) => {
                debug!(
                    "Store hit for {} on {} (age: {}s)",
                    key.wallet,
                    key.token_address,
                    snapshot.age_secs(now)
                );
                self.remember(key.clone(), snapshot.clone()).await;
                Some(snapshot)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Snapshot store read failed, falling back to oracle: {}", e);
                None
            }
        }
    }

    async fn remember(&self, key: SnapshotKey, snapshot: BalanceSnapshot) {
        let mut cache = self.snapshots.write().await;
        // Evict oldest entry if cache is at capacity
        if cache.len() >= MAX_CACHE_SIZE && !cache.contains_key(&key) {
            if let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, v)| v.fetched_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest_key);
            }
        }
        cache.insert(key, snapshot);
    }

    /// Drop every cached snapshot for a wallet (e.g. after a token transfer)
    pub async fn invalidate_wallet(&self, wallet: &WalletIdentity) -> usize {
        let removed = {
            let mut cache = self.snapshots.write().await;
            let before = cache.len();
            cache.retain(|key, _| &key.wallet != wallet);
            before - cache.len()
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.remove_wallet(wallet) {
                warn!("Failed to remove stored snapshots for {}: {}", wallet, e);
            }
        }

        if removed > 0 {
            info!("Invalidated {} cached snapshots for wallet {}", removed, wallet);
        }
        removed
    }

    /// Clear the in-memory cache
    pub async fn clear(&self) {
        let mut cache = self.snapshots.write().await;
        let count = cache.len();
        cache.clear();
        info!("Cleared {} cached snapshots", count);
    }

    /// (total entries, entries still within the staleness bound)
    pub async fn stats(&self) -> (usize, usize) {
        let cache = self.snapshots.read().await;
        let now = chrono::Utc::now().timestamp();
        let total = cache.len();
        let fresh = cache
            .values()
            .filter(|s| s.is_fresh(now, self.staleness_secs))
            .count();
        (total, fresh)
    }
}

#[async_trait]
impl<O: BalanceOracle> BalanceOracle for CachedBalanceOracle<O> {
    async fn fetch_balance(
        &self,
        wallet: &WalletIdentity,
        token_address: &str,
        standard: TokenStandard,
    ) -> Result<BalanceSnapshot, OracleError> {
        let key = SnapshotKey::new(wallet, token_address, standard);
        let now = chrono::Utc::now().timestamp();

        if let Some(snapshot) = self.cached(&key, now).await {
            return Ok(snapshot);
        }

        debug!("Cache miss for {} on {}, querying oracle", wallet, token_address);
        let snapshot = self.inner.fetch_balance(wallet, token_address, standard).await?;

        if let Some(store) = &self.store {
            if let Err(e) = store.store_snapshot(&snapshot) {
                warn!("Failed to persist snapshot for {}: {}", wallet, e);
            }
        }
        self.remember(key, snapshot.clone()).await;

        Ok(snapshot)
    }
}
