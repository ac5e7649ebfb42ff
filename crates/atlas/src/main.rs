//! Atlas - a map, travel-history, and weather agent for your terminal

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use atlas_agent::AgentLoop;
use atlas_config::Config;
use atlas_provider::{OpenAiProvider, Provider};
use atlas_tools::history::TripLog;

/// Atlas - chat with your maps, trips, and weather
#[derive(Parser)]
#[command(name = "atlas")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Model to use (overrides OPENAI_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Trip history file (overrides TRIP_DATA_FILE)
    #[arg(short, long)]
    data_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env().context("invalid environment configuration")?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(data_file) = cli.data_file {
        config.trip_data_file = data_file;
    }

    let log = TripLog::load(&config.trip_data_file)
        .with_context(|| format!("loading {}", config.trip_data_file.display()))?;
    info!(trips = log.len(), "trip history ready");

    let registry = Arc::new(atlas_tools::default_registry(config.rate_limit(), log));
    let provider = OpenAiProvider::new(config.api_key.clone(), config.api_base.clone());
    if !provider.is_configured() {
        anyhow::bail!("OPENAI_API_KEY is not set");
    }

    let mut agent = AgentLoop::new(provider, registry, config.model.clone());

    println!("Atlas ready (model: {})", config.model);
    println!("Try: 'Where is the Eiffel Tower?', 'What are my most visited places?',");
    println!("     'What's the weather at my office?'");
    println!("Commands: 'reset' clears the conversation, 'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "reset" => {
                agent.reset();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        match agent.chat(input).await {
            Ok(answer) => println!("\n{answer}\n"),
            Err(e) => eprintln!("\nError: {e}\n"),
        }
    }

    println!("Goodbye.");
    Ok(())
}
