use anyhow::{Context, Result};
use clap::Parser;
use rest_ratelimit::config::RatelimitConfig;
use rest_ratelimit::replay::{Replay, Script};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Replay scripted requests and responses through the ratelimiter
#[derive(Debug, Parser)]
#[command(name = "ratelimit-replay", version, about)]
struct Args {
    /// JSON script of requests and their canned responses
    #[arg(short, long)]
    script: PathBuf,

    /// JSON config file; environment variables are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wait on the wall clock instead of simulating time
    #[arg(long)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            RatelimitConfig::from_json_str(&json)
        }
        None => RatelimitConfig::from_env(),
    }
    .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("rest_ratelimit={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let script = Script::from_path(&args.script)
        .with_context(|| format!("Failed to load script {}", args.script.display()))?;

    tracing::info!(
        requests = script.requests.len(),
        realtime = args.realtime,
        "Starting replay"
    );

    let replay = if args.realtime {
        Replay::realtime(config)
    } else {
        Replay::virtual_time(config, 0)
    };

    let report = replay.run(script).await.context("Replay failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
