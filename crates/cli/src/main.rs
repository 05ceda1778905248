//! ragstream CLI, the main entry point.
//!
//! Commands:
//! - `chat`      Interactive or single-message chat against the RAG service
//! - `allocate`  Split a retrieval budget across weighted sources
//! - `models`    List the models (RAG apps) the service exposes
//! - `feedback`  Rate an answer
//! - `config`    Show or initialize the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ragstream",
    about = "ragstream: streaming RAG chat client",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the RAG service
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Print every update as a JSON line instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Split a retrieval budget across weighted sources
    Allocate {
        /// Total number of results to retrieve (defaults to allocation.top_k)
        #[arg(short, long)]
        budget: Option<u32>,

        /// Reject malformed bindings instead of dropping them
        #[arg(long)]
        strict: bool,

        /// Bindings as SOURCE:WEIGHT[:PRIORITY]; configured bindings are used if omitted
        #[arg(value_parser = commands::allocate::parse_binding)]
        bindings: Vec<ragstream_core::Binding>,
    },

    /// List available models
    Models,

    /// Rate an answer
    Feedback {
        /// Completion id of the answer
        #[arg(long)]
        message_id: String,

        /// up or down
        #[arg(long)]
        rating: ragstream_core::Rating,

        #[arg(long)]
        reason: Option<String>,

        #[arg(long)]
        comment: Option<String>,

        /// Source URL shown with the answer (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            model,
            json,
        } => commands::chat::run(message, model, json).await?,
        Commands::Allocate {
            budget,
            strict,
            bindings,
        } => commands::allocate::run(budget, strict, bindings).await?,
        Commands::Models => commands::models::run().await?,
        Commands::Feedback {
            message_id,
            rating,
            reason,
            comment,
            sources,
        } => commands::feedback::run(message_id, rating, reason, comment, sources).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Init { force } => commands::config_cmd::init(force).await?,
        },
    }

    Ok(())
}
