//! ============================================================================
//! Access Policy Evaluator - Decides whether a wallet satisfies a requirement
//! ============================================================================
//! Stateless: every call validates the requirement, asks the oracle for the
//! balances it needs and folds the answers into an `AccessVerdict`.
//!
//! Fail-closed: nothing short of a confirmed sufficient balance grants
//! access, and "could not check" is never reported as "zero balance".
//! ============================================================================

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::oracle::{BalanceOracle, OracleError};
use super::requirement::{TokenCheck, TokenRequirement, ValidRequirement};
use super::types::{AccessVerdict, Shortfall, WalletIdentity};

/// Log target for requirements that fail validation, kept apart from denials
pub const INVALID_REQUIREMENT_TARGET: &str = "coursegate_core::invalid_requirement";

/// How EITHER options are queried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// One option at a time, stopping at the first sufficient balance
    #[default]
    Sequential,
    /// All options at once; same precedence applied to the collected results
    Concurrent,
}

/// Outcome of a single balance check
#[derive(Debug, Clone, PartialEq, Eq)]
enum CheckOutcome {
    Sufficient,
    Insufficient(Shortfall),
    Unavailable,
}

/// Token-gate policy evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicyEvaluator {
    mode: EvaluationMode,
}

impl AccessPolicyEvaluator {
    pub fn new(mode: EvaluationMode) -> Self {
        Self { mode }
    }

    pub fn sequential() -> Self {
        Self::new(EvaluationMode::Sequential)
    }

    pub fn concurrent() -> Self {
        Self::new(EvaluationMode::Concurrent)
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Validate `requirement` and evaluate it for `wallet`
    pub async fn evaluate<O>(
        &self,
        requirement: &TokenRequirement,
        wallet: &WalletIdentity,
        oracle: &O,
    ) -> AccessVerdict
    where
        O: BalanceOracle + ?Sized,
    {
        match requirement.validate() {
            Ok(valid) => self.evaluate_valid(&valid, wallet, oracle).await,
            Err(e) => {
                error!(
                    target: INVALID_REQUIREMENT_TARGET,
                    "Invalid {} token requirement (data bug, not a user denial): {}",
                    requirement.kind(),
                    e
                );
                AccessVerdict::invalid_requirement()
            }
        }
    }

    /// Evaluate an already-validated requirement
    pub async fn evaluate_valid<O>(
        &self,
        requirement: &ValidRequirement,
        wallet: &WalletIdentity,
        oracle: &O,
    ) -> AccessVerdict
    where
        O: BalanceOracle + ?Sized,
    {
        match requirement {
            ValidRequirement::None => AccessVerdict::no_requirement(),
            ValidRequirement::Single(check) => {
                match check_balance(check, wallet, oracle).await {
                    CheckOutcome::Sufficient => AccessVerdict::sufficient(),
                    CheckOutcome::Insufficient(shortfall) => AccessVerdict::insufficient(shortfall),
                    CheckOutcome::Unavailable => AccessVerdict::oracle_unavailable(),
                }
            }
            ValidRequirement::Either(options) => {
                let outcomes = match self.mode {
                    EvaluationMode::Sequential => {
                        let mut outcomes = Vec::with_capacity(options.len());
                        for check in options {
                            let outcome = check_balance(check, wallet, oracle).await;
                            let done = outcome == CheckOutcome::Sufficient;
                            outcomes.push(outcome);
                            if done {
                                break;
                            }
                        }
                        outcomes
                    }
                    EvaluationMode::Concurrent => {
                        join_all(options.iter().map(|check| check_balance(check, wallet, oracle)))
                            .await
                    }
                };

                combine_options(wallet, outcomes)
            }
        }
    }
}

/// Evaluate with the default sequential short-circuit policy
pub async fn evaluate<O>(
    requirement: &TokenRequirement,
    wallet: &WalletIdentity,
    oracle: &O,
) -> AccessVerdict
where
    O: BalanceOracle + ?Sized,
{
    AccessPolicyEvaluator::sequential()
        .evaluate(requirement, wallet, oracle)
        .await
}

/// Evaluate with every EITHER option queried at once
pub async fn evaluate_concurrent<O>(
    requirement: &TokenRequirement,
    wallet: &WalletIdentity,
    oracle: &O,
) -> AccessVerdict
where
    O: BalanceOracle + ?Sized,
{
    AccessPolicyEvaluator::concurrent()
        .evaluate(requirement, wallet, oracle)
        .await
}

async fn check_balance<O>(check: &TokenCheck, wallet: &WalletIdentity, oracle: &O) -> CheckOutcome
where
    O: BalanceOracle + ?Sized,
{
    match oracle
        .fetch_balance(wallet, &check.token_address, check.standard)
        .await
    {
        Ok(snapshot) => {
            debug!(
                "{} balance of {} for {}: {} (need {})",
                check.standard, check.token_address, wallet, snapshot.amount, check.min_amount
            );
            match check.shortfall(snapshot.amount) {
                None => CheckOutcome::Sufficient,
                Some(shortfall) => CheckOutcome::Insufficient(shortfall),
            }
        }
        Err(e @ OracleError::MalformedResponse(_)) => {
            error!(
                "Malformed {} balance for {} on {} (chain client or ABI decoding bug): {}",
                check.standard, wallet, check.token_address, e
            );
            CheckOutcome::Unavailable
        }
        Err(e) => {
            warn!(
                "Could not read {} balance for {} on {}: {}",
                check.standard, wallet, check.token_address, e
            );
            CheckOutcome::Unavailable
        }
    }
}

/// Fold listed-order EITHER outcomes into one verdict.
/// First sufficient option wins; a confirmed shortfall outranks an unreachable
/// option; only all-unavailable yields ORACLE_UNAVAILABLE.
fn combine_options(wallet: &WalletIdentity, outcomes: Vec<CheckOutcome>) -> AccessVerdict {
    let mut unavailable = Vec::new();
    let mut first_shortfall = None;

    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            CheckOutcome::Sufficient => {
                debug!("EITHER option {} satisfied for {}", index, wallet);
                return AccessVerdict::sufficient().with_unavailable_options(unavailable);
            }
            CheckOutcome::Insufficient(shortfall) => {
                first_shortfall.get_or_insert(shortfall);
            }
            CheckOutcome::Unavailable => unavailable.push(index),
        }
    }

    if !unavailable.is_empty() {
        warn!(
            "EITHER options {:?} could not be checked for {}",
            unavailable, wallet
        );
    }

    match first_shortfall {
        Some(shortfall) => AccessVerdict::insufficient(shortfall).with_unavailable_options(unavailable),
        None => AccessVerdict::oracle_unavailable().with_unavailable_options(unavailable),
    }
}
