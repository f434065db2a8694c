use std::{fs::File, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use faucet_dispatch::{
    account::{Address, to_coins},
    bin_utils::Service,
    config::DispatcherConfig,
    engine::DispatchEngine,
    ledger::{LedgerGateway, json_rpc::JsonRpcLedger},
    request::TransferRequest,
    vault::{LocalVault, SigningVault},
};
use rust_decimal::Decimal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "faucet-dispatch")]
#[command(about = "Sends transfers from a single ledger account", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FAUCET_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger node JSON-RPC url, overrides the configuration file
    #[arg(long, env = "FAUCET_RPC_URL")]
    rpc_url: Option<String>,

    /// Signing key file, overrides the configuration file
    #[arg(long, env = "FAUCET_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "FAUCET_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new source account key and print its address
    NewAccount {
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },
    /// Print the balance of an address
    Balance { address: Address },
    /// Send one transfer
    Send {
        address: String,
        /// Amount in whole coins, defaults to the configured amount
        #[arg(long)]
        amount: Option<Decimal>,
    },
    /// Send every transfer listed in an `address,amount` CSV file
    Batch { file: PathBuf },
}

fn init_tracing(cli: &Cli) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = DispatcherConfig::load(cli.config.as_deref())?;
    if let Some(rpc_url) = cli.rpc_url {
        config.rpc_url = rpc_url;
    }
    if let Some(key_file) = cli.key_file {
        config.key_file = key_file;
    }

    match cli.command {
        Command::NewAccount { force } => {
            if config.key_file.exists() && !force {
                bail!(
                    "Key file `{}` already exists, pass --force to replace it",
                    config.key_file.display()
                );
            }
            let vault = LocalVault::generate();
            vault
                .write_key_file(&config.key_file)
                .with_context(|| format!("Failed to write `{}`", config.key_file.display()))?;
            println!("{}", vault.address());
        }
        Command::Balance { address } => {
            let balance = connect(&config)?
                .balance(&address)
                .await
                .with_context(|| format!("Failed to query balance of {address}"))?;
            match to_coins(balance, config.dispatch.unit_decimals) {
                Some(coins) => println!("{balance} ({coins} coins)"),
                None => println!("{balance}"),
            }
        }
        Command::Send { address, amount } => {
            let engine = build_engine(&config)?;
            let amount = match amount {
                Some(coins) => config.base_units(coins)?,
                None => config.default_amount()?,
            };
            let handle = engine
                .dispatch(TransferRequest::new(address, amount))
                .await?;
            println!("{} {}", handle.sequence, handle.tx_hash);
        }
        Command::Batch { file } => {
            let engine = build_engine(&config)?;
            let input = File::open(&file)
                .with_context(|| format!("Failed to open `{}`", file.display()))?;
            let summary = Service {
                engine: &engine,
                config: &config,
                input,
                output: &mut std::io::stdout(),
            }
            .run()
            .await?;
            if summary.failed > 0 {
                bail!(
                    "{} of {} transfers failed",
                    summary.failed,
                    summary.failed + summary.accepted
                );
            }
        }
    }
    Ok(())
}

fn connect(config: &DispatcherConfig) -> Result<JsonRpcLedger> {
    Ok(JsonRpcLedger::new(&config.rpc_url, config.rpc_timeout())?)
}

fn build_engine(config: &DispatcherConfig) -> Result<DispatchEngine<JsonRpcLedger, LocalVault>> {
    let vault = LocalVault::from_key_file(&config.key_file).with_context(|| {
        format!(
            "Failed to load signing key from `{}`, create one with `new-account`",
            config.key_file.display()
        )
    })?;
    tracing::info!(account = %vault.address(), "loaded source account");
    Ok(DispatchEngine::new(
        Arc::new(connect(config)?),
        Arc::new(vault),
        config.policy()?,
    ))
}
