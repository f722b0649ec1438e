//! ============================================================================
//! Balance Oracle - Source of on-chain truth for the policy evaluator
//! ============================================================================
//! The evaluator only ever talks to the chain through this trait, so it can be
//! driven by the RPC-backed oracle, the caching wrapper, or a test fake.
//! Retry, timeout and caching policy all live behind the trait.
//! ============================================================================

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::types::{BalanceSnapshot, TokenStandard, WalletIdentity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Network/RPC failure or timeout. Access could not be checked.
    #[error("Balance oracle unavailable: {0}")]
    Unavailable(String),

    /// The chain answered with something that is not a valid balance
    #[error("Malformed balance response: {0}")]
    MalformedResponse(String),
}

impl OracleError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, OracleError::MalformedResponse(_))
    }
}

/// Reads a wallet's holdings of one token
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn fetch_balance(
        &self,
        wallet: &WalletIdentity,
        token_address: &str,
        standard: TokenStandard,
    ) -> Result<BalanceSnapshot, OracleError>;
}

#[async_trait]
impl<T: BalanceOracle + ?Sized> BalanceOracle for Arc<T> {
    async fn fetch_balance(
        &self,
        wallet: &WalletIdentity,
        token_address: &str,
        standard: TokenStandard,
    ) -> Result<BalanceSnapshot, OracleError> {
        (**self).fetch_balance(wallet, token_address, standard).await
    }
}
