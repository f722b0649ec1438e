// ============================================================================
// coursegate - CLI for token-gated course access
// ============================================================================
// Usage:
//   coursegate validate FILE                         Decode and validate a requirement
//   coursegate check FILE --wallet ADDR              Evaluate access against the chain
//   coursegate balance --wallet ADDR --token ADDR    Read one balance
//   coursegate cache stats|list|prune|forget         Inspect the snapshot store
//   coursegate progress FILE                         Aggregate enrollment records
// ============================================================================

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use coursegate_core::access::{
    decode_requirement, format_amount, normalize_address, BalanceOracle, GatedContent, RpcBalanceOracle,
    TokenRequirement, TokenStandard, ValidRequirement, WalletIdentity,
};
use coursegate_core::{aggregate, AccessGate, EnrollmentRecord, GateConfig, SnapshotStore};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Log filter used when RUST_LOG is unset
const DEFAULT_LOG_FILTER: &str = "coursegate_core=info";

/// Coursegate access tool
#[derive(Parser)]
#[command(name = "coursegate", version, about = "Validate and evaluate token-gated course access")]
struct Cli {
    /// Path to the snapshot database (default: ~/.coursegate/snapshots.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode and validate a requirement or course/live-session record
    Validate {
        /// JSON file holding a tokenRequirement or a content record
        file: String,
    },

    /// Evaluate a requirement for a wallet and print the verdict
    Check {
        file: String,

        /// Wallet address (0x-prefixed, any case)
        #[arg(long)]
        wallet: String,

        /// Query EITHER options concurrently
        #[arg(long)]
        concurrent: bool,
    },

    /// Read a single ERC-20 balance or NFT count
    Balance {
        #[arg(long)]
        wallet: String,

        /// Token contract address
        #[arg(long)]
        token: String,

        /// Token standard: erc20 or nft
        #[arg(long, default_value = "erc20")]
        standard: String,

        /// Decimals used to format the amount
        #[arg(long, default_value = "0")]
        decimals: u8,
    },

    /// Inspect the persistent balance snapshot store
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Aggregate a JSON array of enrollment records into XP and level
    Progress { file: String },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show snapshot counts
    Stats,

    /// List snapshots, optionally for one wallet
    List {
        #[arg(long)]
        wallet: Option<String>,
    },

    /// Delete snapshots older than the given age
    Prune {
        /// Age in seconds
        #[arg(long, default_value = "86400")]
        older_than: i64,

        /// Show what would be pruned without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every snapshot for a wallet
    Forget {
        #[arg(long)]
        wallet: String,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn parse_standard(s: &str) -> Result<TokenStandard> {
    s.parse::<TokenStandard>()
        .map_err(|_| anyhow!("Unknown standard '{}'. Valid values: erc20, nft", s))
}

fn parse_token(s: &str) -> Result<String> {
    normalize_address(s)
        .ok_or_else(|| anyhow!("Malformed token address '{}': expected 0x followed by 40 hex digits", s))
}

fn parse_wallet(s: &str) -> Result<WalletIdentity> {
    Ok(WalletIdentity::parse(s)?)
}

fn read_json(path: &str) -> Result<Value> {
    let raw = std::fs::read_to_string(Path::new(path)).with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path))
}

/// A file holds either a bare requirement or a record carrying one
enum Document {
    Requirement(TokenRequirement),
    Content(GatedContent),
}

impl Document {
    fn load(path: &str) -> Result<Self> {
        let value = read_json(path)?;
        let is_record = value
            .as_object()
            .map(|o| o.contains_key("tokenRequirement") || o.contains_key("token_requirement"))
            .unwrap_or(false);

        if is_record {
            Ok(Document::Content(GatedContent::from_record(&value)?))
        } else {
            Ok(Document::Requirement(decode_requirement(&value)?))
        }
    }

    fn requirement(&self) -> &TokenRequirement {
        match self {
            Document::Requirement(r) => r,
            Document::Content(c) => &c.requirement,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        debug!("No .env file loaded: {}", e);
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Check {
            file,
            wallet,
            concurrent,
        } => cmd_check(cli.db_path, &file, &wallet, concurrent).await,
        Commands::Balance {
            wallet,
            token,
            standard,
            decimals,
        } => cmd_balance(&wallet, &token, &standard, decimals).await,
        Commands::Cache { action } => {
            let config = GateConfig::from_env()?;
            let db = SnapshotStore::open(cli.db_path.as_deref().or(config.db_path.as_deref()))?;
            match action {
                CacheCommands::Stats => cmd_cache_stats(&db, config.staleness_secs),
                CacheCommands::List { wallet } => cmd_cache_list(&db, wallet),
                CacheCommands::Prune { older_than, dry_run } => cmd_cache_prune(&db, older_than, dry_run),
                CacheCommands::Forget { wallet } => cmd_cache_forget(&db, &wallet),
            }
        }
        Commands::Progress { file } => cmd_progress(&file),
    }
}

fn cmd_validate(file: &str) -> Result<()> {
    let doc = Document::load(file)?;
    let valid = doc.requirement().validate()?;

    if let Document::Content(content) = &doc {
        println!("{} {} '{}'", content.kind.display_name(), content.id, content.title);
    }

    match &valid {
        ValidRequirement::None => println!("Requirement: NONE (open access)"),
        ValidRequirement::Single(check) => println!("Requirement: {} {}", check.standard, check.token_address),
        ValidRequirement::Either(checks) => println!("Requirement: EITHER ({} options)", checks.len()),
    }
    println!("{}", serde_json::to_string_pretty(doc.requirement())?);

    Ok(())
}

async fn cmd_check(db_path: Option<String>, file: &str, wallet: &str, concurrent: bool) -> Result<()> {
    let wallet = parse_wallet(wallet)?;
    let doc = Document::load(file)?;

    let mut config = GateConfig::from_env()?;
    if db_path.is_some() {
        config.db_path = db_path;
    }
    if concurrent {
        config.concurrent_either = true;
    }

    let gate = AccessGate::from_config(&config)?;

    let verdict = match &doc {
        Document::Content(content) => match gate.gate_content(&wallet, content).await {
            Ok(verdict) => verdict,
            Err(denied) => {
                eprintln!("{}", denied);
                denied.verdict
            }
        },
        Document::Requirement(requirement) => gate.check_access(&wallet, requirement).await,
    };

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

async fn cmd_balance(wallet: &str, token: &str, standard: &str, decimals: u8) -> Result<()> {
    let wallet = parse_wallet(wallet)?;
    let token = parse_token(token)?;
    let standard = parse_standard(standard)?;
    let config = GateConfig::from_env()?;

    let oracle = RpcBalanceOracle::with_options(&config.rpc_url, config.rpc_timeout(), config.retry.clone())?;
    let snapshot = oracle.fetch_balance(&wallet, &token, standard).await?;

    println!("Wallet:   {}", snapshot.wallet);
    println!("Token:    {} ({})", snapshot.token_address, snapshot.standard);
    println!("Amount:   {} (raw {})", format_amount(snapshot.amount, decimals), snapshot.amount);
    println!("Fetched:  {}", format_timestamp(snapshot.fetched_at));

    Ok(())
}

fn cmd_cache_stats(db: &SnapshotStore, staleness_secs: i64) -> Result<()> {
    let stats = db.stats(staleness_secs)?;

    println!("=== Coursegate Snapshot Store ===");
    println!("Database:  {}", db.path().display());
    println!();
    println!("Snapshots: {} total, {} fresh (< {}s)", stats.total_snapshots, stats.fresh_snapshots, staleness_secs);
    for (standard, count) in &stats.by_standard {
        println!("  {:8} {}", standard, count);
    }
    println!("Wallets:   {}", stats.distinct_wallets);
    if let Some(oldest) = stats.oldest_fetched_at {
        println!("Oldest:    {}", format_timestamp(oldest));
    }

    Ok(())
}

fn cmd_cache_list(db: &SnapshotStore, wallet: Option<String>) -> Result<()> {
    let filter = wallet.as_deref().map(parse_wallet).transpose()?;
    let snapshots = db.list_snapshots(filter.as_ref())?;

    if snapshots.is_empty() {
        println!("No snapshots found.");
        return Ok(());
    }

    println!(
        "{:<44} {:<44} {:<6} {:>24} {}",
        "WALLET", "TOKEN", "TYPE", "AMOUNT", "FETCHED"
    );
    println!("{}", "-".repeat(150));

    for s in &snapshots {
        println!(
            "{:<44} {:<44} {:<6} {:>24} {}",
            s.wallet,
            s.token_address,
            s.standard,
            s.amount,
            format_timestamp(s.fetched_at)
        );
    }

    println!("\n{} snapshot(s)", snapshots.len());
    Ok(())
}

fn cmd_cache_prune(db: &SnapshotStore, older_than: i64, dry_run: bool) -> Result<()> {
    if older_than < 0 {
        anyhow::bail!("--older-than must be non-negative");
    }

    if dry_run {
        let stale = db.snapshots_older_than(older_than)?;
        println!("[DRY RUN] Would prune {} snapshot(s) older than {}s", stale.len(), older_than);
        for s in &stale {
            println!("  {} {} ({})", s.wallet, s.token_address, format_timestamp(s.fetched_at));
        }
        return Ok(());
    }

    let pruned = db.prune_older_than(older_than)?;
    println!("Pruned {} snapshot(s) older than {}s", pruned, older_than);
    Ok(())
}

fn cmd_cache_forget(db: &SnapshotStore, wallet: &str) -> Result<()> {
    let wallet = parse_wallet(wallet)?;
    let removed = db.remove_wallet(&wallet)?;
    if removed == 0 {
        warn!("No snapshots stored for {}", wallet);
    }
    println!("Removed {} snapshot(s) for {}", removed, wallet);
    Ok(())
}

fn cmd_progress(file: &str) -> Result<()> {
    let records: Vec<EnrollmentRecord> =
        serde_json::from_value(read_json(file)?).with_context(|| format!("{} is not a list of enrollment records", file))?;
    let progress = aggregate(&records);

    println!("{}", serde_json::to_string_pretty(&progress)?);
    Ok(())
}
