//! Market Lens - command line entry point
//!
//! `serve` runs the HTTP API; `analyze` runs one analysis and prints its
//! events to stdout as NDJSON.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use market_lens::{AnalysisRequest, AppConfig, AppState, ConfigService, RunOptions, StreamEvent};
use market_lens_core::{AnalysisType, DateRange};
use market_lens_llm::ProviderType;

#[derive(Parser)]
#[command(name = "market-lens", version, about = "Streaming LLM market analysis")]
struct Cli {
    /// Path to market-lens.toml
    #[arg(long, global = true, env = "MARKET_LENS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one analysis and print NDJSON events
    Analyze {
        /// Keyword or market to analyse
        subject: String,
        /// keyword, audience or comprehensive
        #[arg(long = "type", default_value = "keyword")]
        analysis_type: String,
        /// Extra context passed to the model
        #[arg(long)]
        context: Option<String>,
        /// Window start (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// Window end (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        /// Provider to try first
        #[arg(long)]
        provider: Option<String>,
        /// Skip the response cache
        #[arg(long)]
        no_cache: bool,
    },
}

/// Initialize tracing on stderr so stdout stays clean for NDJSON.
fn init_tracing(default_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigService::load(cli.config.as_deref())
        .context("failed to load configuration")?
        .into_config();
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Analyze {
            subject,
            analysis_type,
            context,
            start,
            end,
            provider,
            no_cache,
        } => {
            let analysis_type: AnalysisType = analysis_type.parse()?;
            let range = DateRange::parse(start.as_deref(), end.as_deref())?;
            let mut request = AnalysisRequest::new(&subject, analysis_type)?.with_date_range(range);
            if let Some(context) = context {
                request = request.with_context(context);
            }
            if let Some(provider) = provider {
                let provider: ProviderType = provider.parse().map_err(anyhow::Error::msg)?;
                request = request.with_provider_preference(provider);
            }
            analyze(config, request, RunOptions { bypass_cache: no_cache }).await
        }
    }
}

async fn serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state = AppState::new(config)?;
    tracing::info!(providers = ?state.orchestrator().provider_names(), "provider chain ready");
    market_lens::run_server(state, addr).await?;
    Ok(())
}

async fn analyze(config: AppConfig, request: AnalysisRequest, options: RunOptions) -> Result<()> {
    let state = AppState::new(config)?;
    let mut stream = state.orchestrator().stream(request, options);

    let stdout = std::io::stdout();
    let mut failed = None;
    while let Some(event) = stream.next().await {
        if let StreamEvent::Error { message, kind } = &event {
            failed = Some(format!("{}: {}", kind, message));
        }
        let mut out = stdout.lock();
        out.write_all(event.to_ndjson_line().as_bytes())?;
        out.flush()?;
    }

    if let Some(reason) = failed {
        bail!("analysis failed ({})", reason);
    }
    Ok(())
}
