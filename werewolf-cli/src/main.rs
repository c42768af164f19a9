//! Werewolf terminal runner.
//!
//! Plays a full game between AI characters and prints it as it happens.
//!
//! ```bash
//! cargo run -p werewolf-cli -- --roster config/characters.json
//! cargo run -p werewolf-cli -- --offline --fast --seed 7
//! ```

mod console;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use werewolf_core::{
    DecisionProvider, GameConfig, GameEngine, LlmDecisionProvider, PacingConfig, RandomProvider,
};

#[derive(Debug, Parser)]
#[command(name = "werewolf", about = "Run a werewolf game between AI characters")]
struct Args {
    /// Character roster (JSON array of profiles).
    #[arg(long, default_value = "config/characters.json")]
    roster: PathBuf,

    /// Game configuration (JSON). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the random provider instead of an LLM. No API key needed.
    #[arg(long)]
    offline: bool,

    /// Seed the game RNG for a reproducible deal.
    #[arg(long)]
    seed: Option<u64>,

    /// Skip pacing delays between phases.
    #[arg(long)]
    fast: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "werewolf_core=info,werewolf=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GameConfig::load(path)
            .await
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GameConfig::default(),
    };
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if args.fast {
        config = config.with_pacing(PacingConfig::instant());
    }

    let provider: Arc<dyn DecisionProvider> = if args.offline {
        Arc::new(match config.seed {
            Some(seed) => RandomProvider::seeded(seed),
            None => RandomProvider::new(),
        })
    } else {
        match LlmDecisionProvider::from_env() {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                eprintln!("Error: {e}");
                eprintln!("Set LLM_API_KEY in .env or the environment, or pass --offline.");
                std::process::exit(1);
            }
        }
    };
    tracing::info!(provider = provider.name(), "Starting werewolf");

    let mut engine = GameEngine::new(config, provider);
    engine
        .load_roster_file(&args.roster)
        .await
        .with_context(|| format!("loading roster from {}", args.roster.display()))?;

    console::run(engine).await
}
