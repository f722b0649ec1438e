//! ============================================================================
//! Requirement Metadata - Decoding persisted course/session token gates
//! ============================================================================
//! Stored requirement documents are loosely typed: field names vary between
//! records (`amount` vs `minAmount`, `contractAddress` vs `tokenAddress`),
//! amounts may be numbers or decimal strings, and the whole requirement is
//! sometimes stored as a JSON string inside the record. This module folds all
//! of that into one canonical `TokenRequirement`. It does not validate.
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

use super::requirement::{TokenRequirement, DEFAULT_NFT_MIN_AMOUNT};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Invalid requirement JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown requirement type '{0}'")]
    UnknownType(String),

    #[error("Invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    #[error("Content record is missing '{0}'")]
    MissingField(&'static str),

    #[error("Unknown content kind '{0}'")]
    UnknownContentKind(String),
}

/// Requirement document as found in storage, before canonicalization.
/// Serializing writes the canonical field names with `minAmount` in human
/// units (scaled down by `decimals`), the same form decoding expects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRequirement {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(
        rename = "tokenAddress",
        alias = "token_address",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub token_address: Option<String>,
    #[serde(
        rename = "contractAddress",
        alias = "contract_address",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub contract_address: Option<String>,
    #[serde(
        rename = "minAmount",
        alias = "min_amount",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
    #[serde(
        rename = "tokenName",
        alias = "token_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub token_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<RawRequirement>,
}

impl RawRequirement {
    /// `type` when present, otherwise inferred from which fields are set.
    /// Only a document with no gate fields at all is open; anything else
    /// without a type is read as ERC20 and left to validation.
    fn kind(&self) -> String {
        match self.kind.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => kind.to_ascii_lowercase(),
            _ if !self.options.is_empty() => "either".to_string(),
            _ if self.has_gate_fields() => "erc20".to_string(),
            _ => "none".to_string(),
        }
    }

    fn has_gate_fields(&self) -> bool {
        let set = |v: &Option<Value>| matches!(v, Some(v) if !v.is_null());
        self.token_address.is_some()
            || self.contract_address.is_some()
            || set(&self.min_amount)
            || set(&self.amount)
            || self.token_name.is_some()
            || self.decimals.is_some()
    }

    fn address(&self) -> String {
        self.token_address
            .clone()
            .filter(|a| !a.trim().is_empty())
            .or_else(|| self.contract_address.clone())
            .unwrap_or_default()
    }

    fn amount(&self, decimals: u8) -> Result<Option<i128>, MetadataError> {
        match self.min_amount.as_ref().or(self.amount.as_ref()) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => parse_units(&n.to_string(), decimals).map(Some),
            Some(Value::String(s)) => parse_units(s, decimals).map(Some),
            Some(other) => Err(MetadataError::InvalidAmount {
                value: other.to_string(),
                reason: "expected a number or decimal string".into(),
            }),
        }
    }

    pub fn into_requirement(self) -> Result<TokenRequirement, MetadataError> {
        let token_name = self.token_name.clone().filter(|n| !n.trim().is_empty());

        match self.kind().as_str() {
            "none" | "free" | "open" => Ok(TokenRequirement::None),
            "erc20" | "token" | "fungible" => {
                let decimals = self.decimals.unwrap_or(0);
                Ok(TokenRequirement::Erc20 {
                    token_address: self.address(),
                    token_name,
                    min_amount: self.amount(decimals)?,
                    decimals,
                })
            }
            "nft" | "erc721" => Ok(TokenRequirement::Nft {
                token_address: self.address(),
                token_name,
                min_amount: self.amount(0)?.unwrap_or(DEFAULT_NFT_MIN_AMOUNT),
            }),
            "either" | "any" | "or" => Ok(TokenRequirement::Either {
                options: self
                    .options
                    .into_iter()
                    .map(RawRequirement::into_requirement)
                    .collect::<Result<_, _>>()?,
            }),
            other => Err(MetadataError::UnknownType(other.to_string())),
        }
    }
}

impl TryFrom<RawRequirement> for TokenRequirement {
    type Error = MetadataError;

    fn try_from(raw: RawRequirement) -> Result<Self, Self::Error> {
        raw.into_requirement()
    }
}

impl From<TokenRequirement> for RawRequirement {
    fn from(requirement: TokenRequirement) -> Self {
        let kind = Some(requirement.kind().to_string());

        match requirement {
            TokenRequirement::None => RawRequirement {
                kind,
                ..Default::default()
            },
            TokenRequirement::Erc20 {
                token_address,
                token_name,
                min_amount,
                decimals,
            } => RawRequirement {
                kind,
                token_address: Some(token_address),
                token_name,
                min_amount: min_amount.map(|amount| amount_value(amount, decimals)),
                decimals: Some(decimals),
                ..Default::default()
            },
            TokenRequirement::Nft {
                token_address,
                token_name,
                min_amount,
            } => RawRequirement {
                kind,
                token_address: Some(token_address),
                token_name,
                min_amount: Some(amount_value(min_amount, 0)),
                ..Default::default()
            },
            TokenRequirement::Either { options } => RawRequirement {
                kind,
                options: options.into_iter().map(RawRequirement::from).collect(),
                ..Default::default()
            },
        }
    }
}

/// Smallest units back to the stored form: a JSON number when unscaled and
/// small enough, otherwise a decimal string
fn amount_value(amount: i128, decimals: u8) -> Value {
    if decimals == 0 {
        return match i64::try_from(amount) {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(amount.to_string()),
        };
    }

    let Some(scale) = 10u128.checked_pow(decimals as u32) else {
        return Value::String(amount.to_string());
    };

    let sign = if amount < 0 { "-" } else { "" };
    let magnitude = amount.unsigned_abs();
    let whole = magnitude / scale;
    let fraction = format!("{:0>width$}", magnitude % scale, width = decimals as usize);
    let fraction = fraction.trim_end_matches('0');

    if fraction.is_empty() {
        Value::String(format!("{}{}", sign, whole))
    } else {
        Value::String(format!("{}{}.{}", sign, whole, fraction))
    }
}

/// Decode a stored requirement value. `null` means no gate; a JSON string is
/// treated as an embedded JSON document.
pub fn decode_requirement(value: &Value) -> Result<TokenRequirement, MetadataError> {
    match value {
        Value::Null => Ok(TokenRequirement::None),
        Value::String(s) if s.trim().is_empty() => Ok(TokenRequirement::None),
        Value::String(s) => decode_requirement_str(s),
        other => RawRequirement::deserialize(other)?.into_requirement(),
    }
}

pub fn decode_requirement_str(json: &str) -> Result<TokenRequirement, MetadataError> {
    let value: Value = serde_json::from_str(json)?;
    decode_requirement(&value)
}

/// Scale a decimal quantity like "12.5" into smallest units.
/// Negative values pass through so validation can reject them.
pub fn parse_units(raw: &str, decimals: u8) -> Result<i128, MetadataError> {
    let invalid = |reason: &str| MetadataError::InvalidAmount {
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("empty amount"));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals as usize {
        return Err(invalid(&format!("more than {} fractional digits", decimals)));
    }

    let scale = 10i128
        .checked_pow(decimals as u32)
        .ok_or_else(|| invalid("decimals too large"))?;
    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<i128>().map_err(|_| invalid("amount too large"))?
    };
    let fraction_value = if fraction.is_empty() {
        0
    } else {
        format!("{:0<width$}", fraction, width = decimals as usize)
            .parse::<i128>()
            .map_err(|_| invalid("amount too large"))?
    };

    let value = whole_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction_value))
        .ok_or_else(|| invalid("amount too large"))?;

    Ok(if negative { -value } else { value })
}

/// What a gate is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Course,
    LiveSession,
}

impl FromStr for ContentKind {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "course" => Ok(ContentKind::Course),
            "live_session" | "livesession" | "session" => Ok(ContentKind::LiveSession),
            _ => Err(MetadataError::UnknownContentKind(s.to_string())),
        }
    }
}

impl ContentKind {

    pub fn display_name(&self) -> &'static str {
        match self {
            ContentKind::Course => "Course",
            ContentKind::LiveSession => "Live Session",
        }
    }
}

/// A course or live session together with its decoded access gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatedContent {
    pub kind: ContentKind,
    pub id: String,
    pub title: String,
    pub requirement: TokenRequirement,
}

impl GatedContent {
    /// Decode a course/live-session record carrying a `tokenRequirement` field
    pub fn from_record(record: &Value) -> Result<Self, MetadataError> {
        let id = match record.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(MetadataError::MissingField("id")),
        };

        let title = record
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let kind = record
            .get("kind")
            .or_else(|| record.get("contentType"))
            .and_then(Value::as_str)
            .and_then(|kind| kind.parse::<ContentKind>().ok())
            .unwrap_or(ContentKind::Course);

        let requirement = record
            .get("tokenRequirement")
            .or_else(|| record.get("token_requirement"))
            .map(decode_requirement)
            .transpose()?
            .unwrap_or(TokenRequirement::None);

        Ok(Self {
            kind,
            id,
            title,
            requirement,
        })
    }
}
