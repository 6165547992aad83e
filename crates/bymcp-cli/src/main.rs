//! CLI entry point for bymcp.
//!
//! This binary provides the `bymcp` command: `serve` runs the MCP server
//! on stdio, the other subcommands inspect and prepare its environment.

mod adapters;
mod cli;
mod helpers;
mod logging;

use anyhow::{Context, Result};
use bymcp_adapters::payroll::transfers_table;
use bymcp_adapters::{Adapter, DataDir, MicrosoftConfig, QontoConfig, SharePointConfig};
use bymcp_auth_engine::microsoft::MICROSOFT_PROVIDER;
use bymcp_auth_engine::qonto::QONTO_PROVIDER;
use bymcp_auth_engine::{PendingDeviceFlow, TokenCache};
use bymcp_mcp::McpServer;
use bymcp_store::{Database, StateFile, TransferStore};
use clap::Parser;
use tracing::{error, info};

use crate::adapters::{init_adapters, init_services, microsoft_session, qonto_session};
use crate::cli::{Cli, Commands, Provider};
use crate::helpers::{config_reason, load_env};
use crate::logging::init_tracing;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    load_env(cli.env_file.as_deref())?;

    let data_dir = DataDir::from_env().context("failed to resolve the data directory")?;
    data_dir.ensure().with_context(|| {
        format!(
            "failed to create the data directory {}",
            data_dir.root().display()
        )
    })?;

    match cli.command {
        Commands::Serve => cmd_serve(&data_dir).await,
        Commands::Status => cmd_status(&data_dir).await,
        Commands::Tools => cmd_tools(&data_dir).await,
        Commands::Transfers { period } => cmd_transfers(&data_dir, period.as_deref()).await,
        Commands::Authorize { provider } => cmd_authorize(&data_dir, provider).await,
        Commands::Logout { provider } => cmd_logout(&data_dir, provider),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(data_dir: &DataDir) -> Result<()> {
    init_tracing("info", Some(&data_dir.logs_dir()))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.root().display(),
        "starting bymcp"
    );

    let services = init_services(data_dir).await?;
    let adapters = init_adapters(&services, data_dir, true).await?;
    let server = McpServer::new(adapters);

    if let Err(e) = bymcp_mcp::serve_stdio(&server).await {
        error!(error = %e, "MCP transport failed");
        return Err(e).context("MCP transport failed");
    }
    info!("bymcp stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

async fn cmd_status(data_dir: &DataDir) -> Result<()> {
    init_tracing("warn", None)?;

    println!();
    println!("  bymcp v{}", env!("CARGO_PKG_VERSION"));
    println!("  Data directory: {}", data_dir.root().display());
    println!();

    println!("  Configuration:");
    let qonto = QontoConfig::from_env().map_err(|e| config_reason(&e));
    let payments = match &qonto {
        Ok(config) => config.oauth_client().map(|_| ()).map_err(|e| config_reason(&e)),
        Err(reason) => Err(reason.clone()),
    };
    println!("    Qonto API:       {}", presence(qonto.as_ref().map(|_| ()).map_err(Clone::clone)));
    println!("    Qonto payments:  {}", presence(payments));
    println!(
        "    Microsoft:       {}",
        presence(MicrosoftConfig::from_env().map(|_| ()).map_err(|e| config_reason(&e)))
    );
    println!(
        "    SharePoint:      {}",
        presence(SharePointConfig::from_env().map(|_| ()).map_err(|e| config_reason(&e)))
    );
    println!();

    let services = init_services(data_dir).await?;
    let adapters = init_adapters(&services, data_dir, true).await?;
    println!("  Adapters:");
    for adapter in &adapters {
        let health = adapter.health_check().await?;
        println!(
            "    {:<10} {:<10} {} tools",
            adapter.id(),
            health,
            adapter.tools().len()
        );
    }
    println!();

    println!("  Tokens:");
    println!(
        "    Qonto:           {}",
        cached(&TokenCache::new(QONTO_PROVIDER, data_dir.qonto_tokens_path()))
    );
    println!(
        "    Microsoft:       {}",
        cached(&TokenCache::new(MICROSOFT_PROVIDER, data_dir.ms_tokens_path()))
    );
    println!();

    let count = services.ledger.count().await?;
    println!("  Transfers in ledger: {count}");
    println!();
    Ok(())
}

fn presence(result: std::result::Result<(), String>) -> String {
    match result {
        Ok(()) => "configured".to_string(),
        Err(reason) => format!("not configured ({reason})"),
    }
}

fn cached(cache: &TokenCache) -> &'static str {
    if cache.valid_access_token().is_some() {
        "valid"
    } else if cache.refresh_token().is_some() {
        "expired (refreshable)"
    } else {
        "none"
    }
}

// ---------------------------------------------------------------------------
// Subcommand: tools
// ---------------------------------------------------------------------------

async fn cmd_tools(data_dir: &DataDir) -> Result<()> {
    init_tracing("warn", None)?;

    let services = init_services(data_dir).await?;
    let adapters = init_adapters(&services, data_dir, false).await?;
    for adapter in &adapters {
        println!("[{}]", adapter.id());
        for tool in adapter.tools() {
            println!("  {}", tool.name);
            println!("      {}", tool.description);
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: transfers
// ---------------------------------------------------------------------------

async fn cmd_transfers(data_dir: &DataDir, period: Option<&str>) -> Result<()> {
    init_tracing("warn", None)?;

    let db = Database::open_and_migrate(data_dir.ledger_path())
        .await
        .context("failed to open the transfer ledger")?;
    let records = TransferStore::new(db).list(period).await?;
    println!("{}", transfers_table(period, &records));
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands: authorize, logout
// ---------------------------------------------------------------------------

async fn cmd_authorize(data_dir: &DataDir, provider: Provider) -> Result<()> {
    init_tracing("warn", None)?;

    match provider {
        Provider::Qonto => {
            let config = QontoConfig::from_env().context("Qonto is not configured")?;
            let session =
                qonto_session(&config, data_dir).context("Qonto OAuth is not configured")?;
            session
                .authorize_interactive(|url| {
                    println!("Open this URL to authorize bymcp with Qonto:");
                    println!();
                    println!("  {url}");
                    println!();
                    println!("Waiting for the redirect...");
                })
                .await
                .context("Qonto authorization failed")?;
            println!("Authorization successful. Qonto token saved.");
        }
        Provider::Microsoft => {
            let config = MicrosoftConfig::from_env().context("Microsoft is not configured")?;
            let session = microsoft_session(&config, data_dir);
            let device = session
                .start_device_flow()
                .await
                .context("failed to start the device authorization")?;
            println!("To sign in to Office 365:");
            println!("  1. Open {}", device.verification_uri);
            println!("  2. Enter the code {}", device.user_code);
            println!();
            println!("Waiting for the sign-in to complete...");
            session
                .complete_device_flow()
                .await
                .context("Microsoft authorization failed")?;
            println!("Authorization successful. Office 365 token saved.");
        }
    }
    Ok(())
}

fn cmd_logout(data_dir: &DataDir, provider: Provider) -> Result<()> {
    match provider {
        Provider::Qonto => {
            TokenCache::new(QONTO_PROVIDER, data_dir.qonto_tokens_path())
                .clear()
                .context("failed to remove the Qonto tokens")?;
            println!("Qonto tokens removed.");
        }
        Provider::Microsoft => {
            TokenCache::new(MICROSOFT_PROVIDER, data_dir.ms_tokens_path())
                .clear()
                .context("failed to remove the Microsoft tokens")?;
            StateFile::<PendingDeviceFlow>::new(data_dir.ms_device_flow_path())
                .clear()
                .context("failed to remove the pending device authorization")?;
            println!("Office 365 tokens removed.");
        }
    }
    Ok(())
}
