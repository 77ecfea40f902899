mod chain;
mod config;
mod error;
mod ledger;
mod planning;
mod scanner;
mod settlement;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::chain::{ChainProvider, ContractReader, JsonRpcProvider};
use crate::config::AirdropConfig;
use crate::ledger::{JsonLedgerStore, LedgerStore};
use crate::planning::Planner;
use crate::scanner::TracingProgress;
use crate::settlement::SettlementExecutor;

#[derive(Parser, Debug)]
#[command(name = "airdrop")]
#[command(about = "Plan and send a proportional token airdrop to holders of a token")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan holders at the snapshot block and write an unsent airdrop plan
    Plan {
        /// Path to the airdrop configuration file (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Path to write the plan file to
        #[arg(short, long)]
        plan_file: PathBuf,

        /// Overwrite an existing plan file
        #[arg(long)]
        force: bool,
    },
    /// Send the unsent transactions of a plan, verifying earlier ones first
    Send {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        plan_file: PathBuf,
    },
    /// Print a plan and its progress
    Show {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        plan_file: PathBuf,
    },
}

// Initialize logging and tracing
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info,airdrop=debug" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn connect(config: &AirdropConfig) -> anyhow::Result<Arc<dyn ChainProvider>> {
    let provider = JsonRpcProvider::new(config.rpc_url.clone(), config.rpc_timeout)
        .with_context(|| format!("Failed to create RPC client for {}", config.rpc_url))?;
    Ok(Arc::new(provider))
}

async fn plan(config: AirdropConfig, plan_file: PathBuf, force: bool) -> anyhow::Result<()> {
    let store = JsonLedgerStore::new(&plan_file);
    if store.exists().await? {
        if !force {
            bail!(
                "A plan file already exists at {}; pass --force to overwrite it",
                plan_file.display()
            );
        }
        warn!("Overwriting existing plan file {}", plan_file.display());
    }

    let provider = connect(&config)?;
    let outcome = Planner::new(config, provider)
        .plan(&TracingProgress)
        .await
        .context("Planning failed")?;

    println!("{}", outcome.plan.as_table(&outcome.reward_token));
    store.save(&outcome.plan).await?;
    info!("💾 Saved {} to {}", outcome.plan, plan_file.display());
    Ok(())
}

async fn send(config: AirdropConfig, plan_file: PathBuf) -> anyhow::Result<()> {
    let store = Arc::new(JsonLedgerStore::new(&plan_file));
    let mut plan = store
        .load()
        .await
        .with_context(|| format!("Failed to load plan {}", plan_file.display()))?;
    plan.check_matches(config.reward_token_address, config.rewarder_account_address)?;

    let provider = connect(&config)?;
    let reader = ContractReader::new(provider.clone(), config.call_retry_policy());
    let reward_token = reader.token_info(config.reward_token_address).await?;
    println!("{}", plan.as_table(&reward_token));
    info!(
        "Preparing to send {} of {} ({} still unsent)",
        reward_token.formatted_amount(plan.total_amount_wei()),
        plan,
        reward_token.formatted_amount(plan.unsent_amount_wei())
    );

    let executor = SettlementExecutor::new(provider, store, config.settlement_config());
    let report = executor.execute(&mut plan).await?;
    info!(
        "🎉 Done: {} sent now, {} verified from earlier runs, {} in total",
        report.sent,
        report.reverified,
        reward_token.formatted_amount(report.total_amount_wei)
    );
    Ok(())
}

async fn show(config: AirdropConfig, plan_file: PathBuf) -> anyhow::Result<()> {
    let plan = JsonLedgerStore::new(&plan_file)
        .load()
        .await
        .with_context(|| format!("Failed to load plan {}", plan_file.display()))?;
    if let Err(e) = plan.check_matches(config.reward_token_address, config.rewarder_account_address) {
        warn!("{}", e);
    }

    let provider = connect(&config)?;
    let reader = ContractReader::new(provider, config.call_retry_policy());
    let reward_token = reader.token_info(plan.reward_token_address).await?;
    println!("{}", plan.as_table(&reward_token));
    println!(
        "Planned at {} for snapshot block {}: {} of {} transactions sent, {} unsent",
        plan.created_at,
        plan.snapshot_block_number,
        plan.sent_transactions().count(),
        plan.transactions.len(),
        reward_token.formatted_amount(plan.unsent_amount_wei())
    );
    if plan.is_fully_sent() {
        println!("Every transaction has been sent; run `send` again to re-verify receipts");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    dotenv::dotenv().ok();

    let result = match cli.command {
        Command::Plan {
            config,
            plan_file,
            force,
        } => {
            let config = AirdropConfig::load(&config)
                .with_context(|| format!("Invalid configuration {}", config.display()))?;
            plan(config, plan_file, force).await
        }
        Command::Send { config, plan_file } => {
            let config = AirdropConfig::load(&config)
                .with_context(|| format!("Invalid configuration {}", config.display()))?;
            send(config, plan_file).await
        }
        Command::Show { config, plan_file } => {
            let config = AirdropConfig::load(&config)
                .with_context(|| format!("Invalid configuration {}", config.display()))?;
            show(config, plan_file).await
        }
    };

    if let Err(e) = &result {
        error!("❌ {:#}", e);
    }
    result
}
