//! ============================================================================
//! Access Module - Token-gated access to courses and live sessions
//! ============================================================================
//! Decides whether a wallet may open gated content based on ERC-20 balances
//! or NFT ownership read from an EVM chain.
//!
//! ## Requirements
//! - **NONE**: open content, the oracle is never consulted
//! - **ERC20**: minimum fungible balance (smallest units)
//! - **NFT**: minimum number of units owned (default 1)
//! - **EITHER**: any one of a flat list of ERC20/NFT options, checked in order
//!
//! ## Usage
//! ```rust,ignore
//! use coursegate_core::access::{AccessGate, GatedContent, WalletIdentity};
//!
//! let gate = AccessGate::from_config(&GateConfig::from_env()?)?;
//! let wallet = WalletIdentity::parse("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")?;
//! match gate.gate_content(&wallet, &course).await {
//!     Ok(verdict) => { /* unlocked */ }
//!     Err(denied) => println!("{}", denied),
//! }
//! ```
//! ============================================================================

mod cache;
mod checker;
mod evaluator;
mod gate;
mod metadata;
mod oracle;
mod requirement;
mod retry;
mod types;

// Re-export public types
pub use cache::{CachedBalanceOracle, DEFAULT_STALENESS_SECS};
pub use checker::{
    decode_uint256, encode_balance_of, RpcBalanceOracle, BALANCE_OF_SELECTOR, DEFAULT_RPC_TIMEOUT_MS,
};
pub use evaluator::{
    evaluate, evaluate_concurrent, AccessPolicyEvaluator, EvaluationMode, INVALID_REQUIREMENT_TARGET,
};
pub use gate::{AccessDenied, AccessGate};
pub use metadata::{
    decode_requirement, decode_requirement_str, parse_units, ContentKind, GatedContent, MetadataError,
    RawRequirement,
};
pub use oracle::{BalanceOracle, OracleError};
pub use requirement::{
    validate, InvalidRequirementError, TokenCheck, TokenRequirement, ValidRequirement,
    DEFAULT_NFT_MIN_AMOUNT,
};
pub use retry::{calculate_delay, classify_error, with_retry, ErrorKind, RetryConfig};
pub use types::{
    format_amount, normalize_address, AccessReason, AccessVerdict, BalanceSnapshot,
    InvalidWalletError, Shortfall, TokenStandard, UnknownStandardError, WalletIdentity,
};
