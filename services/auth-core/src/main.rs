use anyhow::Context;
use auth_core::auth::{MemoryPrincipalRepository, TracingAuditSink};
use auth_core::crypto::TokenKeys;
use auth_core::{AuthCore, Config};
use clap::{Parser, Subcommand};
use rust_common::{init_tracing, TracingConfig};
use std::sync::Arc;
use tracing::info;

/// Operator commands for the authentication core.
#[derive(Parser, Debug)]
#[command(name = "auth-core", version, about = "Authentication core operator tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print configuration lines for fresh signing and encryption keys.
    Keygen,
    /// Load configuration, resolve keys and probe the revocation store.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Keygen => keygen(),
        Command::Check => check().await,
    }
}

fn keygen() -> anyhow::Result<()> {
    let material = TokenKeys::generate()
        .context("generating key material")?
        .export();
    println!("TOKEN_SIGNING_KEY={}", material.signing_key.as_str());
    println!("TOKEN_ENCRYPTION_KEY={}", material.encryption_key.as_str());
    println!("# public key: {}", material.public_key);
    Ok(())
}

async fn check() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    init_tracing(
        &TracingConfig::default()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_log_level(config.logging.level.clone())
            .with_json_output(config.logging.json),
    );

    let core = AuthCore::from_config(
        &config,
        Arc::new(MemoryPrincipalRepository::new()),
        Arc::new(TracingAuditSink),
    )
    .await
    .context("building auth core")?;
    core.health_check()
        .await
        .context("revocation store health check")?;

    info!(
        key_strategy = core.keys.name(),
        store = core.registry.store().backend(),
        "configuration ok"
    );
    Ok(())
}
