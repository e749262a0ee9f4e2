mod cli;
mod config;
mod keys;
mod storage;

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use crate::cli::{Command, ConfigCommand, KeyCommand};
use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Key(cmd) => run_key_command(cmd, &config).await?,
        Command::Health => run_health_check(&config).await?,
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info. Logs go to stderr so
    // envelopes and plaintext on stdout stay clean.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("keyhold {}", env!("CARGO_PKG_VERSION"));
}

async fn run_key_command(cmd: KeyCommand, config: &config::Config) -> Result<()> {
    let vault = Arc::new(storage::vault_from_config(config)?);
    let input = match cmd {
        KeyCommand::Encrypt { .. } | KeyCommand::Decrypt { .. } => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
        _ => Vec::new(),
    };

    let out = keys::execute(&vault, cmd, config.exclude_from_backup(), input).await?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&out)?;
    stdout.flush()?;
    Ok(())
}

/// Runs a full create/seal/open/delete cycle against the configured stores.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let vault = Arc::new(storage::vault_from_config(config)?);
    keys::run_health(&vault).await?;
    println!("Key store: ok");
    println!("Blob store: ok ({})", vault.blob_store().root().display());
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
