//! docuvalid - document validation toolkit
//!
//! Runs the proxy gateway and drives the validation data flow from a terminal:
//! request id management, loading through any strategy, local payload storage
//! and record review.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use dv_core::SystemClock;
use dv_dispatch::LoadState;
use dv_gateway::GatewayConfig;
use dv_strategy::StrategyKind;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::App;
use config::AppConfig;

/// docuvalid - document validation toolkit
#[derive(Parser, Debug)]
#[command(name = "docuvalid")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage directory (overrides DOCUVALID_STORAGE_DIR)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Access token for database writes (overrides DOCUVALID_ACCESS_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the proxy/CORS gateway
    Serve,

    /// Load validation data through a strategy
    Load {
        /// webhook, localStorage or database
        #[arg(short, long, default_value = "webhook")]
        strategy: StrategyKind,

        /// Page URL to resolve the request id (and record id) from
        #[arg(long)]
        url: Option<String>,

        /// Explicit request id, bypassing resolution
        #[arg(long)]
        request_id: Option<String>,

        /// Database record id
        #[arg(long)]
        record_id: Option<String>,
    },

    /// Store an extraction payload in local storage
    Save {
        /// JSON file holding the payload object
        file: PathBuf,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Show the resolved request id and its source
    CurrentId {
        /// Page URL; also prints it rewritten to carry the resolved id
        #[arg(long)]
        url: Option<String>,
    },

    /// Generate a new request id
    GenerateId {
        /// Also make it the current id
        #[arg(long)]
        persist: bool,
    },

    /// Validate and store a request id in both scopes
    SetId {
        id: String,
    },

    /// Remove the stored request id
    ClearId,

    /// Remove expired extraction payloads
    Cleanup {
        /// Maximum payload age in seconds (default: one hour)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },

    /// Review a database record, optionally advancing its status
    Review {
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        record_id: Option<String>,

        /// Acknowledge every field and move to the next status
        #[arg(long)]
        advance: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Serve = cli.command {
        let config = GatewayConfig::load()?;
        dv_gateway::serve(config).await?;
        return Ok(());
    }

    let mut config = AppConfig::load()?;
    if let Some(storage_dir) = cli.storage_dir {
        config.storage_dir = storage_dir;
    }
    if let Some(token) = cli.token {
        config.access_token = Some(token);
    }
    let app = App::new(config, Arc::new(SystemClock))?;

    match cli.command {
        Commands::Serve => {}
        Commands::Load {
            strategy,
            url,
            request_id,
            record_id,
        } => {
            let state = app
                .load(strategy, url.as_deref(), request_id.as_deref(), record_id)
                .await?;
            print_json(&serde_json::to_value(&state)?)?;
            if let LoadState::Error { message } = state {
                anyhow::bail!(message);
            }
        }
        Commands::Save { file, request_id } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let Value::Object(data) = serde_json::from_str::<Value>(&raw)
                .with_context(|| format!("{} is not valid JSON", file.display()))?
            else {
                anyhow::bail!("{} must contain a JSON object", file.display());
            };
            let outcome = app.save(request_id.as_deref(), &data).await?;
            print_json(&serde_json::to_value(&outcome)?)?;
        }
        Commands::CurrentId { url } => print_json(&app.current_id(url.as_deref())?)?,
        Commands::GenerateId { persist } => println!("{}", app.generate_id(persist)?),
        Commands::SetId { id } => println!("{}", app.set_id(&id)?),
        Commands::ClearId => app.clear_id(),
        Commands::Cleanup { max_age_secs } => {
            let removed = app.cleanup(max_age_secs.map(Duration::from_secs))?;
            println!("removed {removed} payload(s)");
        }
        Commands::Review {
            url,
            record_id,
            advance,
        } => print_json(&app.review(url.as_deref(), record_id, advance).await?)?,
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
