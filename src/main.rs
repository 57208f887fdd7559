use channel_bridge::application::controller::{Activation, TransferController};
use channel_bridge::config::TransferConfig;
use channel_bridge::domain::balance::{Amount, Balance};
use channel_bridge::domain::channel::PublicIdentifier;
use channel_bridge::domain::ports::{SharedChainReader, SharedEngine};
use channel_bridge::infrastructure::in_memory::{InMemoryEngine, RouterBehaviour, RouterSim};
use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs one cross-chain transfer against a simulated channel engine and
/// prints the final session status as JSON.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Transfer configuration (JSON)
    config: PathBuf,

    /// Amount deposited on-chain once the deposit watch is running
    #[arg(long, default_value = "10")]
    amount: Decimal,

    /// How the simulated router reacts to our transfer
    #[arg(long, value_enum, default_value_t = Scenario::Forward)]
    scenario: Scenario,

    /// Router liquidity on the withdraw side
    #[arg(long, default_value = "1000000")]
    liquidity: Decimal,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scenario {
    /// Router forwards and reclaims
    Forward,
    /// Router forwards but never reclaims its side
    NoReclaim,
    /// Router cancels our transfer
    Cancel,
    /// Router never answers
    Ignore,
}

impl Scenario {
    fn router(self) -> RouterSim {
        let behaviour = match self {
            Scenario::Forward | Scenario::NoReclaim => RouterBehaviour::Forward,
            Scenario::Cancel => RouterBehaviour::Cancel,
            Scenario::Ignore => RouterBehaviour::Ignore,
        };
        RouterSim {
            behaviour,
            reclaim: !matches!(self, Scenario::NoReclaim),
            ..RouterSim::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = TransferConfig::from_json_file(&cli.config)?;
    let amount = Amount::new(cli.amount)?;
    let deposit_asset = config.deposit.asset_id.clone();

    let engine = InMemoryEngine::for_config(
        &config,
        PublicIdentifier::new("cli-user"),
        Balance::new(cli.liquidity),
    );
    engine.set_router(cli.scenario.router()).await;
    let shared: SharedEngine = Arc::new(engine.clone());
    let chain: SharedChainReader = Arc::new(engine.clone());

    let controller = TransferController::new(shared, chain, config);
    controller.on_ready(|channels| {
        info!(deposit = %channels.deposit, withdraw = %channels.withdraw, "Channels ready");
    });

    if let Activation::AwaitingDeposit { deposit_address } = controller.open().await? {
        info!(deposit_address = %deposit_address, amount = %amount, "Depositing on-chain");
        engine
            .deposit_onchain(&deposit_address, &deposit_asset, amount)
            .await;
    }

    let status = controller.wait_for_terminal(None).await?;
    controller.close();

    println!("{}", serde_json::to_string_pretty(&status).into_diagnostic()?);

    match status.error {
        Some(error) => Err(miette::miette!(
            code = "channel_bridge::transfer_failed",
            help = format!("recovery: {:?}", error.recovery),
            "transfer failed in {}: {}",
            error.failed_in,
            error.message
        )),
        None => Ok(()),
    }
}
