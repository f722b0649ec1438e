//! ============================================================================
//! Access Gate - Cached requirement evaluation for courses and live sessions
//! ============================================================================
//! Combines the policy evaluator with a caching balance oracle and turns
//! verdicts into user-facing outcomes for the web layer.
//! ============================================================================

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::cache::CachedBalanceOracle;
use super::checker::RpcBalanceOracle;
use super::evaluator::{AccessPolicyEvaluator, EvaluationMode};
use super::metadata::GatedContent;
use super::oracle::BalanceOracle;
use super::requirement::TokenRequirement;
use super::types::{AccessReason, AccessVerdict, WalletIdentity};
use crate::config::GateConfig;
use crate::db::SnapshotStore;

/// A refused `gate_content` call, carrying the verdict and a message safe to show end users
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AccessDenied {
    pub verdict: AccessVerdict,
    pub message: String,
}

impl AccessDenied {
    fn new(content: &GatedContent, verdict: AccessVerdict) -> Self {
        let what = content.kind.display_name();

        let message = match verdict.reason {
            AccessReason::OracleUnavailable => format!(
                "Could not verify access to this {} right now. Please try again.",
                what.to_lowercase()
            ),
            AccessReason::InvalidRequirement => format!(
                "This {} is temporarily unavailable.",
                what.to_lowercase()
            ),
            _ => match &verdict.shortfall {
                Some(shortfall) => format!(
                    "{} '{}' is token-gated. You need {} more {} to join.",
                    what,
                    content.title,
                    shortfall.display_amount(),
                    shortfall.label()
                ),
                None => format!("{} '{}' is token-gated.", what, content.title),
            },
        };

        Self { verdict, message }
    }

    /// True when the user may simply retry later
    pub fn is_retryable(&self) -> bool {
        self.verdict.reason == AccessReason::OracleUnavailable
    }
}

/// Access gate with snapshot caching for efficient evaluation
pub struct AccessGate<O = RpcBalanceOracle> {
    oracle: CachedBalanceOracle<O>,
    evaluator: AccessPolicyEvaluator,
}

impl AccessGate<RpcBalanceOracle> {
    /// Build the RPC-backed gate described by `config`
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let rpc = RpcBalanceOracle::with_options(&config.rpc_url, config.rpc_timeout(), config.retry.clone())?;
        let mut oracle = CachedBalanceOracle::with_staleness(rpc, config.staleness_secs);

        if let Some(path) = &config.db_path {
            oracle = oracle.with_store(Arc::new(SnapshotStore::open(Some(path))?));
        }

        info!(
            "Access gate ready (rpc: {}, staleness: {}s, mode: {:?})",
            config.rpc_url,
            config.staleness_secs,
            config.evaluation_mode()
        );

        Ok(Self::with_cached_oracle(oracle, config.evaluation_mode()))
    }
}

impl<O: BalanceOracle> AccessGate<O> {
    /// Gate over any oracle with a custom staleness bound
    pub fn with_oracle(oracle: O, staleness_secs: i64, mode: EvaluationMode) -> Self {
        Self::with_cached_oracle(CachedBalanceOracle::with_staleness(oracle, staleness_secs), mode)
    }

    pub fn with_cached_oracle(oracle: CachedBalanceOracle<O>, mode: EvaluationMode) -> Self {
        Self {
            oracle,
            evaluator: AccessPolicyEvaluator::new(mode),
        }
    }

    pub fn oracle(&self) -> &CachedBalanceOracle<O> {
        &self.oracle
    }

    /// Evaluate a requirement for a wallet, using cached balances when fresh
    pub async fn check_access(&self, wallet: &WalletIdentity, requirement: &TokenRequirement) -> AccessVerdict {
        self.evaluator.evaluate(requirement, wallet, &self.oracle).await
    }

    /// Gate a course or live session - returns the verdict if allowed, `AccessDenied` if not
    pub async fn gate_content(
        &self,
        wallet: &WalletIdentity,
        content: &GatedContent,
    ) -> std::result::Result<AccessVerdict, AccessDenied> {
        let verdict = self.check_access(wallet, &content.requirement).await;

        if verdict.granted {
            return Ok(verdict);
        }

        match verdict.reason {
            AccessReason::InvalidRequirement => error!(
                "{} {} has an invalid token requirement; fix its metadata",
                content.kind.display_name(),
                content.id
            ),
            reason => warn!(
                "Access denied to {} {} for wallet {}: {}",
                content.kind.display_name(),
                content.id,
                wallet,
                reason.as_str()
            ),
        }

        Err(AccessDenied::new(content, verdict))
    }

    /// Invalidate cache for a wallet (e.g., after token transfer)
    pub async fn invalidate_cache(&self, wallet: &WalletIdentity) {
        self.oracle.invalidate_wallet(wallet).await;
    }

    /// Clear the entire in-memory cache
    pub async fn clear_cache(&self) {
        self.oracle.clear().await;
    }

    /// (total, fresh) cached snapshot counts
    pub async fn cache_stats(&self) -> (usize, usize) {
        self.oracle.stats().await
    }
}
