//! Handshake agent CLI.

mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use handshake_core::{Engine, identity_store};

use config::Config;

#[derive(Parser)]
#[command(name = "handshake-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate (or load, if already present) this agent's identity
    Keygen,

    /// Rotate the identity's passphrase
    Rotate {
        /// Old passphrase
        #[arg(long)]
        old_passphrase: String,

        /// New passphrase
        #[arg(long)]
        new_passphrase: String,
    },

    /// Run the agent: connect to the bus and drive the handshake engine
    Run {
        /// Bus address to connect to, overriding the config file
        #[arg(long)]
        bus: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(PathBuf::from(path))?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    match cli.command {
        Commands::Keygen => keygen(&config).await?,
        Commands::Rotate {
            old_passphrase,
            new_passphrase,
        } => rotate(&config, &old_passphrase, &new_passphrase).await?,
        Commands::Run { bus } => run(&config, bus).await?,
    }

    Ok(())
}

fn passphrase(config: &Config) -> anyhow::Result<String> {
    identity_store::passphrase_from_env().map_err(|e| {
        anyhow::anyhow!(
            "{e} (set it before running `keygen`/`run` for agent {})",
            config.identity.agent_name
        )
    })
}

async fn keygen(config: &Config) -> anyhow::Result<()> {
    let pass = passphrase(config)?;
    let identity = identity_store::load_or_create(
        &config.identity.identity_dir,
        &config.identity.agent_name,
        &pass,
    )
    .await?;

    println!("agent_id: {}", identity.agent_id());
    println!("kx_pub:   {}", hex::encode(identity.kx_pub()));
    println!("sign_pub: {}", hex::encode(identity.sign_pub()));
    Ok(())
}

async fn rotate(config: &Config, old_passphrase: &str, new_passphrase: &str) -> anyhow::Result<()> {
    identity_store::rotate(
        &config.identity.identity_dir,
        &config.identity.agent_name,
        old_passphrase,
        new_passphrase,
    )
    .await?;
    println!("passphrase rotated for {}", config.identity.agent_name);
    Ok(())
}

async fn run(config: &Config, bus_override: Option<String>) -> anyhow::Result<()> {
    let pass = passphrase(config)?;
    let identity = identity_store::load_or_create(
        &config.identity.identity_dir,
        &config.identity.agent_name,
        &pass,
    )
    .await?;

    let addr = bus_override.unwrap_or_else(|| config.bus.addr.clone());
    tracing::info!(agent_id = identity.agent_id(), bus = %addr, "starting agent");

    let (engine, inbound) = Engine::connect(&identity, config.engine.clone(), &addr)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    engine.run(inbound).await.map_err(|e| anyhow::anyhow!("{e}"))
}
