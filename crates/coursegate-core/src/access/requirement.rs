//! ============================================================================
//! Token Requirements - Access policies attached to courses and live sessions
//! ============================================================================
//! A `TokenRequirement` is the canonical (but still unchecked) policy shape.
//! `validate` turns it into a `ValidRequirement`, the only form the
//! evaluator acts on.
//! ============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::metadata::RawRequirement;
use super::types::{normalize_address, Shortfall, TokenStandard};

/// Default NFT unit count when none is given
pub const DEFAULT_NFT_MIN_AMOUNT: i128 = 1;

/// Access policy as decoded from content metadata.
/// Amounts are in the token's smallest unit and may be negative here so that
/// bad data reaches validation instead of being silently clamped.
///
/// Both serde directions go through `RawRequirement`, so the canonical shape
/// and the legacy field names share one decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRequirement", into = "RawRequirement")]
pub enum TokenRequirement {
    /// No gate
    None,
    /// Fungible token minimum balance; a missing minimum fails validation
    Erc20 {
        token_address: String,
        token_name: Option<String>,
        min_amount: Option<i128>,
        decimals: u8,
    },
    /// Minimum number of NFT units owned
    Nft {
        token_address: String,
        token_name: Option<String>,
        min_amount: i128,
    },
    /// Any one of the listed options
    Either { options: Vec<TokenRequirement> },
}

impl Default for TokenRequirement {
    fn default() -> Self {
        TokenRequirement::None
    }
}

impl TokenRequirement {
    pub fn erc20(token_address: impl Into<String>, min_amount: i128) -> Self {
        TokenRequirement::Erc20 {
            token_address: token_address.into(),
            token_name: None,
            min_amount: Some(min_amount),
            decimals: 0,
        }
    }

    pub fn nft(token_address: impl Into<String>, min_amount: i128) -> Self {
        TokenRequirement::Nft {
            token_address: token_address.into(),
            token_name: None,
            min_amount,
        }
    }

    pub fn either(options: Vec<TokenRequirement>) -> Self {
        TokenRequirement::Either { options }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TokenRequirement::None => "NONE",
            TokenRequirement::Erc20 { .. } => "ERC20",
            TokenRequirement::Nft { .. } => "NFT",
            TokenRequirement::Either { .. } => "EITHER",
        }
    }

    pub fn validate(&self) -> Result<ValidRequirement, InvalidRequirementError> {
        validate(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRequirementError {
    #[error("{standard} requirement is missing a token address")]
    MissingTokenAddress { standard: TokenStandard },

    #[error("Malformed token address '{address}': expected 0x followed by 40 hex digits")]
    MalformedTokenAddress { address: String },

    #[error("{standard} requirement is missing a minimum amount")]
    MissingMinAmount { standard: TokenStandard },

    #[error("Minimum amount must be non-negative, got {amount}")]
    NegativeMinAmount { amount: i128 },

    #[error("Minimum amount {amount} does not fit in an unsigned 128-bit balance")]
    MinAmountOverflow { amount: i128 },

    #[error("EITHER requirement has no options")]
    EmptyOptions,

    #[error("EITHER option {index} is itself an EITHER requirement (nesting is not allowed)")]
    NestedEither { index: usize },

    #[error("EITHER option {index} has no token requirement")]
    NoneOption { index: usize },

    #[error("EITHER option {index}: {source}")]
    InvalidOption {
        index: usize,
        #[source]
        source: Box<InvalidRequirementError>,
    },
}

/// A single balance check against one token contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCheck {
    pub standard: TokenStandard,
    /// Lowercase, `0x`-prefixed
    pub token_address: String,
    pub token_name: Option<String>,
    /// Smallest-unit minimum
    pub min_amount: u128,
    pub decimals: u8,
}

impl TokenCheck {
    pub fn is_satisfied_by(&self, held: u128) -> bool {
        held >= self.min_amount
    }

    /// Amount still missing, or `None` if `held` already satisfies the check
    pub fn shortfall(&self, held: u128) -> Option<Shortfall> {
        if self.is_satisfied_by(held) {
            return None;
        }

        Some(Shortfall {
            token_address: self.token_address.clone(),
            token_name: self.token_name.clone(),
            standard: self.standard,
            amount: self.min_amount - held,
            decimals: self.decimals,
        })
    }
}

/// A requirement that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "checks", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidRequirement {
    None,
    Single(TokenCheck),
    /// Non-empty, in the order given
    Either(Vec<TokenCheck>),
}

impl ValidRequirement {
    /// Every balance check this requirement may need, in listed order
    pub fn checks(&self) -> &[TokenCheck] {
        match self {
            ValidRequirement::None => &[],
            ValidRequirement::Single(check) => std::slice::from_ref(check),
            ValidRequirement::Either(options) => options,
        }
    }
}

/// Check a requirement's shape and normalize its addresses.
/// Pure: no I/O, no logging.
pub fn validate(requirement: &TokenRequirement) -> Result<ValidRequirement, InvalidRequirementError> {
    match requirement {
        TokenRequirement::None => Ok(ValidRequirement::None),
        TokenRequirement::Either { options } => {
            if options.is_empty() {
                return Err(InvalidRequirementError::EmptyOptions);
            }

            let checks = options
                .iter()
                .enumerate()
                .map(|(index, option)| validate_option(index, option))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(ValidRequirement::Either(checks))
        }
        TokenRequirement::Erc20 {
            token_address,
            token_name,
            min_amount,
            decimals,
        } => erc20_check(token_address, token_name, *min_amount, *decimals)
            .map(ValidRequirement::Single),
        TokenRequirement::Nft {
            token_address,
            token_name,
            min_amount,
        } => build_check(TokenStandard::Nft, token_address, token_name, *min_amount, 0)
            .map(ValidRequirement::Single),
    }
}

/// EITHER options are flat: exactly one ERC20 or NFT check each
fn validate_option(index: usize, option: &TokenRequirement) -> Result<TokenCheck, InvalidRequirementError> {
    let wrap = |e| InvalidRequirementError::InvalidOption {
        index,
        source: Box::new(e),
    };

    match option {
        TokenRequirement::None => Err(InvalidRequirementError::NoneOption { index }),
        TokenRequirement::Either { .. } => Err(InvalidRequirementError::NestedEither { index }),
        TokenRequirement::Erc20 {
            token_address,
            token_name,
            min_amount,
            decimals,
        } => erc20_check(token_address, token_name, *min_amount, *decimals)
            .map_err(wrap),
        TokenRequirement::Nft {
            token_address,
            token_name,
            min_amount,
        } => build_check(TokenStandard::Nft, token_address, token_name, *min_amount, 0).map_err(wrap),
    }
}

fn erc20_check(
    token_address: &str,
    token_name: &Option<String>,
    min_amount: Option<i128>,
    decimals: u8,
) -> Result<TokenCheck, InvalidRequirementError> {
    let min_amount = min_amount.ok_or(InvalidRequirementError::MissingMinAmount {
        standard: TokenStandard::Erc20,
    })?;
    build_check(TokenStandard::Erc20, token_address, token_name, min_amount, decimals)
}

fn build_check(
    standard: TokenStandard,
    token_address: &str,
    token_name: &Option<String>,
    min_amount: i128,
    decimals: u8,
) -> Result<TokenCheck, InvalidRequirementError> {
    if token_address.trim().is_empty() {
        return Err(InvalidRequirementError::MissingTokenAddress { standard });
    }

    let token_address = normalize_address(token_address).ok_or_else(|| {
        InvalidRequirementError::MalformedTokenAddress {
            address: token_address.to_string(),
        }
    })?;

    if min_amount < 0 {
        return Err(InvalidRequirementError::NegativeMinAmount { amount: min_amount });
    }

    let min_amount = u128::try_from(min_amount)
        .map_err(|_| InvalidRequirementError::MinAmountOverflow { amount: min_amount })?;

    Ok(TokenCheck {
        standard,
        token_address,
        token_name: token_name.clone().filter(|name| !name.trim().is_empty()),
        min_amount,
        decimals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0xF9a1c3e5B7d9F1a3C5e7B9d1F3a5C7e9B1d3F5a7";
    const NFT: &str = "0x11b2C3d4E5f60718293A4b5C6d7E8f9011223344";

    #[test]
    fn test_none_is_valid() {
        assert_eq!(validate(&TokenRequirement::None).unwrap(), ValidRequirement::None);
        assert!(ValidRequirement::None.checks().is_empty());
    }

    #[test]
    fn test_erc20_normalizes_address() {
        let valid = TokenRequirement::erc20(TOKEN, 100).validate().unwrap();
        match valid {
            ValidRequirement::Single(check) => {
                assert_eq!(check.token_address, TOKEN.to_lowercase());
                assert_eq!(check.standard, TokenStandard::Erc20);
                assert_eq!(check.min_amount, 100);
            }
            other => panic!("expected single check, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty_token_address() {
        assert_eq!(
            TokenRequirement::erc20("", 1).validate(),
            Err(InvalidRequirementError::MissingTokenAddress {
                standard: TokenStandard::Erc20
            })
        );
        assert_eq!(
            TokenRequirement::nft("   ", 1).validate(),
            Err(InvalidRequirementError::MissingTokenAddress {
                standard: TokenStandard::Nft
            })
        );
    }

    #[test]
    fn test_rejects_malformed_token_address() {
        let err = TokenRequirement::erc20("0xF9", 1).validate().unwrap_err();
        assert!(matches!(err, InvalidRequirementError::MalformedTokenAddress { .. }));
    }

    #[test]
    fn test_rejects_negative_min_amount() {
        assert_eq!(
            TokenRequirement::erc20(TOKEN, -1).validate(),
            Err(InvalidRequirementError::NegativeMinAmount { amount: -1 })
        );
        assert_eq!(
            TokenRequirement::nft(NFT, -1).validate(),
            Err(InvalidRequirementError::NegativeMinAmount { amount: -1 })
        );
    }

    #[test]
    fn test_rejects_missing_erc20_min_amount() {
        let requirement = TokenRequirement::Erc20 {
            token_address: TOKEN.into(),
            token_name: None,
            min_amount: None,
            decimals: 0,
        };
        assert_eq!(
            requirement.validate(),
            Err(InvalidRequirementError::MissingMinAmount {
                standard: TokenStandard::Erc20
            })
        );

        let err = TokenRequirement::either(vec![requirement]).validate().unwrap_err();
        assert!(matches!(err, InvalidRequirementError::InvalidOption { index: 0, .. }));
    }

    #[test]
    fn test_zero_min_amount_is_valid() {
        assert!(TokenRequirement::erc20(TOKEN, 0).validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_either() {
        assert_eq!(
            TokenRequirement::either(vec![]).validate(),
            Err(InvalidRequirementError::EmptyOptions)
        );
    }

    #[test]
    fn test_rejects_nested_either() {
        let nested = TokenRequirement::either(vec![
            TokenRequirement::nft(NFT, 1),
            TokenRequirement::either(vec![TokenRequirement::erc20(TOKEN, 1)]),
        ]);
        assert_eq!(
            nested.validate(),
            Err(InvalidRequirementError::NestedEither { index: 1 })
        );
    }

    #[test]
    fn test_rejects_none_inside_either() {
        let requirement = TokenRequirement::either(vec![TokenRequirement::None]);
        assert_eq!(
            requirement.validate(),
            Err(InvalidRequirementError::NoneOption { index: 0 })
        );
    }

    #[test]
    fn test_rejects_invalid_either_option() {
        let requirement = TokenRequirement::either(vec![
            TokenRequirement::nft(NFT, 1),
            TokenRequirement::erc20(TOKEN, -5),
        ]);
        let err = requirement.validate().unwrap_err();
        match err {
            InvalidRequirementError::InvalidOption { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(*source, InvalidRequirementError::NegativeMinAmount { amount: -5 });
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_either_preserves_order() {
        let requirement = TokenRequirement::either(vec![
            TokenRequirement::nft(NFT, 1),
            TokenRequirement::erc20(TOKEN, 1000),
        ]);
        let valid = requirement.validate().unwrap();
        let checks = valid.checks();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].standard, TokenStandard::Nft);
        assert_eq!(checks[1].standard, TokenStandard::Erc20);
    }

    #[test]
    fn test_shortfall() {
        let valid = TokenRequirement::erc20(TOKEN, 100).validate().unwrap();
        let check = &valid.checks()[0];
        assert_eq!(check.shortfall(50).map(|s| s.amount), Some(50));
        assert!(check.shortfall(100).is_none());
        assert!(check.shortfall(150).is_none());
    }

    #[test]
    fn test_canonical_json_shape() {
        let requirement: TokenRequirement = serde_json::from_str(&format!(
            r#"{{"type":"NFT","tokenAddress":"{}"}}"#,
            NFT
        ))
        .unwrap();
        assert_eq!(requirement, TokenRequirement::nft(NFT, 1));

        let json = serde_json::to_value(TokenRequirement::erc20(TOKEN, 100)).unwrap();
        assert_eq!(json["type"], "ERC20");
        assert_eq!(json["tokenAddress"], TOKEN);
        assert_eq!(json["minAmount"], 100);
    }

    #[test]
    fn test_canonical_json_with_amounts_deserializes() {
        let erc20: TokenRequirement = serde_json::from_value(serde_json::json!({
            "type": "ERC20",
            "tokenAddress": TOKEN,
            "minAmount": 100
        }))
        .unwrap();
        assert_eq!(erc20, TokenRequirement::erc20(TOKEN, 100));

        let either: TokenRequirement = serde_json::from_value(serde_json::json!({
            "type": "EITHER",
            "options": [
                { "type": "NFT", "tokenAddress": NFT, "minAmount": 2 },
                { "type": "ERC20", "tokenAddress": TOKEN, "minAmount": "1000" }
            ]
        }))
        .unwrap();
        assert_eq!(
            either,
            TokenRequirement::either(vec![
                TokenRequirement::nft(NFT, 2),
                TokenRequirement::erc20(TOKEN, 1000),
            ])
        );
    }

    #[test]
    fn test_serialized_form_reads_back() {
        let requirement = TokenRequirement::either(vec![
            TokenRequirement::nft(NFT, 3),
            TokenRequirement::Erc20 {
                token_address: TOKEN.into(),
                token_name: Some("LEARN".into()),
                min_amount: Some(1_500),
                decimals: 2,
            },
        ]);
        let json = serde_json::to_string(&requirement).unwrap();
        let back: TokenRequirement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, requirement);
    }
}
