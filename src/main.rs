//! gse-tokens - token lifecycle manager for GSE property-data APIs
//!
//! Operator CLI over the shared token store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gse_tokens::auth::{Expiry, TokenRecord};
use gse_tokens::{Config, GseClient, TokenManager, Vendor};

#[derive(Parser)]
#[command(name = "gse-tokens")]
#[command(about = "OAuth token manager for Fannie Mae and Freddie Mac APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a valid access token, refreshing it if needed
    Token {
        #[arg(value_enum)]
        vendor: Vendor,
    },

    /// Show stored token state for every configured vendor
    Status,

    /// Authenticate with full credentials, replacing the stored tokens
    Login {
        #[arg(value_enum)]
        vendor: Vendor,
    },

    /// Refresh the access token now
    Refresh {
        #[arg(value_enum)]
        vendor: Vendor,
    },

    /// GET a vendor API URL with authorization attached
    Get {
        #[arg(value_enum)]
        vendor: Vendor,

        url: url::Url,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let tokens = Arc::new(TokenManager::from_config(&config)?);

    match cli.command {
        Commands::Token { vendor } => {
            let token = tokens.get_valid_access_token(vendor).await?;
            println!("{}", token);
        }
        Commands::Status => {
            status(&tokens).await?;
        }
        Commands::Login { vendor } => {
            tracing::info!("Authenticating with {}...", vendor);
            let record = tokens.force_authenticate(vendor).await?;
            println!(
                "Logged in to {} (access token valid until {}).",
                vendor,
                format_time(record.access_expires_at())
            );
        }
        Commands::Refresh { vendor } => {
            tracing::info!("Refreshing {} token...", vendor);
            let record = tokens.force_refresh(vendor).await?;
            println!(
                "{} token refreshed (valid until {}).",
                vendor,
                format_time(record.access_expires_at())
            );
        }
        Commands::Get { vendor, url } => {
            let client = GseClient::from_config(&config, tokens.clone())?;
            let resp = client.get(vendor, &url).await?;
            let body = resp.text().await.context("Failed to read response body")?;
            println!("{}", body);
        }
    }

    Ok(())
}

/// Display stored token state
async fn status(tokens: &TokenManager) -> Result<()> {
    let vendors = tokens.vendors();
    if vendors.is_empty() {
        println!("No vendors configured.");
        return Ok(());
    }

    let reports = futures::future::join_all(vendors.iter().map(|v| tokens.inspect(*v))).await;
    for (vendor, report) in vendors.iter().zip(reports) {
        let (record, expiry) = report?;
        print_status(*vendor, &record, &expiry);
    }
    Ok(())
}

fn print_status(vendor: Vendor, record: &TokenRecord, expiry: &Expiry) {
    println!("{}:", vendor);

    let state = if !record.has_access_token() {
        "none"
    } else if expiry.is_access_expired {
        "expired"
    } else if expiry.should_refresh_now {
        "due for refresh"
    } else {
        "valid"
    };
    println!("  access token:  {}", state);

    if record.has_access_token() {
        println!("  issued_at:     {}", format_time(record.issued_at));
        println!("  expires_at:    {}", format_time(expiry.access_expires_at));
        println!("  refresh_after: {}", format_time(expiry.refresh_safety_deadline));
    }

    match (record.has_refresh_token(), expiry.refresh_expires_at) {
        (false, _) => println!("  refresh token: none"),
        (true, Some(_)) if expiry.is_refresh_expired => println!("  refresh token: expired"),
        (true, Some(exp)) => println!("  refresh token: present (until {})", format_time(exp)),
        (true, None) => println!("  refresh token: present"),
    }

    println!("  status:        {:?}", record.status);
}

fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
