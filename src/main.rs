//! sflypd-rs: download and maintain a local copy of a Shutterfly (ThisLife)
//! photo library.
//!
//! Albums are listed over ThisLife's JSON-RPC API, each album's packed
//! moment records are decoded into item ids, and items are streamed into one
//! directory per album. Same-name collisions are resolved by content (pixels
//! for images, bytes otherwise) so re-runs are idempotent and nothing is
//! overwritten. The local copy can be compared with the server, repaired,
//! and deduplicated.

#![warn(clippy::all)]

mod auth;
mod cli;
mod config;
mod lock;
pub mod retry;
mod shutdown;
mod sync;
mod thislife;
mod types;

use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use auth::{Credential, CredentialStore, PromptRenewal};
use config::{Config, TOKEN_FILE_NAME};
use lock::InstanceLock;
use sync::{Orchestrator, RunTotals};
use thislife::client::Endpoints;
use thislife::ThisLifeClient;
use types::Mode;

/// Token from config, or a terminal prompt when interactive.
async fn obtain_token(config: &Config) -> anyhow::Result<String> {
    if let Some(token) = &config.token {
        return Ok(token.clone());
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!(
            "No access token provided.\n\
             Pass --token or set SHUTTERFLY_TOKEN."
        );
    }
    let entered = tokio::task::spawn_blocking(|| {
        rpassword::prompt_password("Enter Shutterfly access token: ")
    })
    .await??;
    let entered = entered.trim().to_string();
    if entered.is_empty() {
        anyhow::bail!("No access token provided");
    }
    Ok(entered)
}

fn log_totals(label: &str, totals: &RunTotals) {
    println!();
    println!("{} complete!", label);
    println!("Total successfully downloaded: {}", totals.succeeded);
    println!("Total failed downloads: {}", totals.failed);
    if totals.interrupted {
        println!("Interrupted; re-run to continue where this run stopped.");
    }
}

async fn run(config: Config, orchestrator: Orchestrator) -> anyhow::Result<()> {
    match &config.mode {
        Mode::Dedupe { thorough } => {
            orchestrator.dedupe_all(*thorough).await?;
        }
        Mode::CountOnly => {
            let (albums, photos) = orchestrator.count_items().await?;
            println!("{} albums, {} photos", albums, photos);
        }
        Mode::Compare => {
            let report = orchestrator.compare_local_vs_server().await?;
            print!("{}", report);
        }
        Mode::FixIncomplete => {
            println!("Starting redownload of incomplete albums...");
            let totals = orchestrator.redownload_incomplete().await?;
            log_totals("Redownload", &totals);
        }
        Mode::Album { name, sanitized } => {
            println!("Starting single album download...");
            if let Some(outcome) = orchestrator.download_single_album(name, *sanitized).await? {
                println!();
                println!("Download complete!");
                println!("Total successfully downloaded: {}", outcome.succeeded);
                println!("Total failed downloads: {}", outcome.failed);
            }
        }
        Mode::DownloadAll { resume_from } => {
            println!("Starting download...");
            let totals = orchestrator.download_all_albums(resume_from.as_deref()).await?;
            log_totals("Download", &totals);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = Config::from_cli(cli)?;
    tracing::debug!(?config, "Parsed configuration");
    tracing::info!(workers = config.workers, "Starting sflypd-rs");

    let shutdown = shutdown::install_signal_handler()?;

    let _lock = if config.mode.writes_local() {
        let lock = InstanceLock::acquire(config.output_dir()).await?;
        tracing::debug!("Holding instance lock {}", lock.path().display());
        Some(lock)
    } else {
        None
    };

    // Dedupe needs nothing from the server; without a token it runs on
    // local files alone and checks every album.
    if config.mode.can_run_offline() && config.token.is_none() {
        if let Mode::Dedupe { thorough } = config.mode {
            tracing::info!("No token provided, deduping without server album counts");
            sync::run_dedupe(config.output_dir.clone(), Default::default(), thorough).await?;
        }
        return Ok(());
    }

    let token = obtain_token(&config).await?;
    let credential = Credential::parse(&token);
    tracing::debug!(
        kind = ?credential.kind(),
        expires_at = ?credential.expires_at(),
        "Using credential"
    );
    if credential.is_expired() {
        tracing::warn!("The provided access token has already expired");
    }

    let client = ThisLifeClient::new(
        Endpoints::default(),
        config.life_uid.clone(),
        config.retry_config(),
        config.timeout,
    )?;

    let renewal = PromptRenewal::new(TOKEN_FILE_NAME);
    let credentials = Arc::new(CredentialStore::new(credential, Box::new(renewal)));

    let ignore = config.load_ignore_set().await?;
    let orchestrator = Orchestrator::new(
        Arc::new(client),
        credentials,
        config.sync_config(ignore),
        shutdown,
    );

    run(config, orchestrator).await
}
