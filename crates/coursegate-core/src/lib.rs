//! ============================================================================
//! COURSEGATE-CORE: Token-gated course access
//! ============================================================================
//! This crate handles the backend logic for the Coursegate platform:
//! - Token requirement validation and access policy evaluation
//! - ERC-20 / NFT balance reads over EVM JSON-RPC
//! - Balance snapshot caching in memory and in redb
//! - Learner progress, XP and level aggregation
//! ============================================================================

pub mod access;
pub mod config;
pub mod db;
pub mod progress;

// Re-export main types for convenience
pub use access::{
    AccessDenied, AccessGate, AccessPolicyEvaluator, AccessReason, AccessVerdict, BalanceOracle,
    TokenRequirement, WalletIdentity,
};
pub use config::GateConfig;
pub use db::SnapshotStore;
pub use progress::{aggregate, EnrollmentRecord, LearnerProgress, Level};
