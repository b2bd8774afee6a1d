//! chatrelay - streaming relay for LLM chat completions
//!
//! Keeps provider API keys on the server and relays completions from
//! several upstream providers to clients as one SSE stream.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::config::{Config, KeySource};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Streaming relay for LLM chat completions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured providers and whether each has a key
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chatrelay={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: &str) -> anyhow::Result<(Config, Vec<(String, KeySource)>)> {
    Config::from_file_with_env(path)
        .with_context(|| format!("failed to load config from {}", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keys may live in a local .env during development
    dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut loaded, key_sources) = load_config(&config)?;
            init_tracing(&loaded.logging.level);
            tracing::info!(config = %config, "Loaded configuration");

            for (provider, source) in &key_sources {
                match source {
                    KeySource::None => tracing::warn!(
                        provider = %provider,
                        env_var = %chatrelay::config::convention_env_var_name(provider),
                        "No API key configured; requests to this provider will fail"
                    ),
                    source => tracing::info!(provider = %provider, source = %source, "API key loaded"),
                }
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }

            chatrelay::proxy::run_server(loaded).await
        }

        Commands::Check { config } => {
            let (loaded, key_sources) = load_config(&config)?;
            println!("Configuration OK: {}", config);
            println!("  listen: {}", loaded.server.listen);
            println!(
                "  default provider: {}",
                loaded.server.default_provider.as_deref().unwrap_or("(none)")
            );
            for (provider, source) in &key_sources {
                println!("  {}: key source {}", provider, source);
            }
            Ok(())
        }

        Commands::Providers { config } => {
            let (loaded, _) = load_config(&config)?;
            if loaded.providers.is_empty() {
                println!("No providers configured.");
                return Ok(());
            }
            println!("{:<20} {:<12} {:<8} KEY", "NAME", "KIND", "SCHEMA");
            for provider in &loaded.providers {
                let key = if provider.api_key.is_some() { "yes" } else { "no" };
                println!(
                    "{:<20} {:<12} {:<8} {}",
                    provider.name,
                    provider.kind.to_string(),
                    provider.schema.to_string(),
                    key
                );
            }
            Ok(())
        }
    }
}
