//! ============================================================================
//! Access Types - Wallets, balance snapshots and access verdicts
//! ============================================================================
//! Shared vocabulary between the requirement validator, the balance oracles
//! and the policy evaluator.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of an EVM address in bytes
pub const ADDRESS_BYTES: usize = 20;

/// Normalize a `0x`-prefixed 20-byte hex address to lowercase.
/// Returns `None` for anything that is not exactly 40 hex digits after the prefix.
pub fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))?;

    if digits.len() != ADDRESS_BYTES * 2 || hex::decode(digits).is_err() {
        return None;
    }

    Some(format!("0x{}", digits.to_ascii_lowercase()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid wallet address '{0}': expected 0x followed by 40 hex digits")]
pub struct InvalidWalletError(pub String);

/// A wallet address in canonical (lowercase) form.
/// Address case is never significant: `0xABC..` and `0xabc..` are the same wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletIdentity(String);

impl WalletIdentity {
    pub fn parse(raw: &str) -> Result<Self, InvalidWalletError> {
        normalize_address(raw)
            .map(Self)
            .ok_or_else(|| InvalidWalletError(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 40 hex digits without the `0x` prefix
    pub fn hex_digits(&self) -> &str {
        &self.0[2..]
    }
}

impl fmt::Display for WalletIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WalletIdentity {
    type Error = InvalidWalletError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletIdentity> for String {
    fn from(wallet: WalletIdentity) -> Self {
        wallet.0
    }
}

/// Token standards a requirement can be checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenStandard {
    /// Fungible balance in the token's smallest unit
    #[serde(rename = "ERC20")]
    Erc20,
    /// Count of non-fungible units owned
    #[serde(rename = "NFT")]
    Nft,
}

impl TokenStandard {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStandard::Erc20 => "ERC20",
            TokenStandard::Nft => "NFT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown token standard '{0}': expected ERC20 or NFT")]
pub struct UnknownStandardError(pub String);

impl FromStr for TokenStandard {
    type Err = UnknownStandardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "erc20" | "token" => Ok(TokenStandard::Erc20),
            "nft" | "erc721" => Ok(TokenStandard::Nft),
            _ => Err(UnknownStandardError(s.to_string())),
        }
    }
}

impl fmt::Display for TokenStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wallet's holdings of one token at a point in time.
/// Never mutated after creation: a refresh produces a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub wallet: WalletIdentity,
    pub token_address: String,
    pub standard: TokenStandard,
    /// Smallest-unit balance (wei-style for ERC-20, unit count for NFTs)
    pub amount: u128,
    /// Unix timestamp (seconds) when the balance was read
    pub fetched_at: i64,
}

impl BalanceSnapshot {
    /// Snapshot stamped with the current time
    pub fn fresh(
        wallet: WalletIdentity,
        token_address: impl Into<String>,
        standard: TokenStandard,
        amount: u128,
    ) -> Self {
        Self {
            wallet,
            token_address: token_address.into(),
            standard,
            amount,
            fetched_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn age_secs(&self, now: i64) -> i64 {
        now - self.fetched_at
    }

    pub fn is_fresh(&self, now: i64, max_age_secs: i64) -> bool {
        self.age_secs(now) < max_age_secs
    }
}

/// Why a verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessReason {
    NoRequirement,
    SufficientBalance,
    InsufficientBalance,
    OracleUnavailable,
    InvalidRequirement,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::NoRequirement => "NO_REQUIREMENT",
            AccessReason::SufficientBalance => "SUFFICIENT_BALANCE",
            AccessReason::InsufficientBalance => "INSUFFICIENT_BALANCE",
            AccessReason::OracleUnavailable => "ORACLE_UNAVAILABLE",
            AccessReason::InvalidRequirement => "INVALID_REQUIREMENT",
        }
    }
}

/// How much more of a token a wallet needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub token_address: String,
    pub token_name: Option<String>,
    pub standard: TokenStandard,
    /// Required minus held, in smallest units
    pub amount: u128,
    pub decimals: u8,
}

impl Shortfall {
    /// Human-readable quantity, e.g. "1.50K"
    pub fn display_amount(&self) -> String {
        format_amount(self.amount, self.decimals)
    }

    /// Token label for messages, falling back to the contract address
    pub fn label(&self) -> &str {
        self.token_name.as_deref().unwrap_or(&self.token_address)
    }
}

/// Result of evaluating one requirement for one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessVerdict {
    pub granted: bool,
    pub reason: AccessReason,
    /// Present only when denied for insufficiency
    pub shortfall: Option<Shortfall>,
    /// Listed-order indices of EITHER options whose balance could not be read
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable_options: Vec<usize>,
}

impl AccessVerdict {
    pub fn no_requirement() -> Self {
        Self::new(true, AccessReason::NoRequirement)
    }

    pub fn sufficient() -> Self {
        Self::new(true, AccessReason::SufficientBalance)
    }

    pub fn insufficient(shortfall: Shortfall) -> Self {
        Self {
            shortfall: Some(shortfall),
            ..Self::new(false, AccessReason::InsufficientBalance)
        }
    }

    pub fn oracle_unavailable() -> Self {
        Self::new(false, AccessReason::OracleUnavailable)
    }

    pub fn invalid_requirement() -> Self {
        Self::new(false, AccessReason::InvalidRequirement)
    }

    fn new(granted: bool, reason: AccessReason) -> Self {
        Self {
            granted,
            reason,
            shortfall: None,
            unavailable_options: Vec::new(),
        }
    }

    pub fn with_unavailable_options(mut self, indices: Vec<usize>) -> Self {
        self.unavailable_options = indices;
        self
    }
}

/// Format a smallest-unit amount with K/M/B suffixes
pub fn format_amount(raw: u128, decimals: u8) -> String {
    if decimals == 0 && raw < 1_000 {
        return raw.to_string();
    }

    let amount = raw as f64 / 10f64.powi(decimals as i32);

    if amount >= 1_000_000_000.0 {
        format!("{:.2}B", amount / 1_000_000_000.0)
    } else if amount >= 1_000_000.0 {
        format!("{:.2}M", amount / 1_000_000.0)
    } else if amount >= 1_000.0 {
        format!("{:.2}K", amount / 1_000.0)
    } else {
        format!("{:.2}", amount)
    }
}
