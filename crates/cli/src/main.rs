//! codeloop CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive session (default) or a single message with `-m`
//! - `sessions`: List or delete saved sessions
//! - `init`: Write a default config file

use clap::{Parser, Subcommand};

mod commands;
mod input;
mod render;
mod slash;

#[derive(Parser)]
#[command(
    name = "codeloop",
    about = "codeloop: a coding agent for your terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent in the current directory
    Chat {
        /// Run a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Resume a saved session by id
        #[arg(long)]
        resume: Option<String>,

        /// Allow every tool call that is not deny-listed, without asking
        #[arg(long)]
        yolo: bool,
    },

    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// Initialize the configuration directory
    Init,
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// List saved sessions, most recent first
    List,
    /// Delete a saved session
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr and stay quiet by default so they don't break up the REPL
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let command = cli.command.unwrap_or(Commands::Chat {
        message: None,
        resume: None,
        yolo: false,
    });

    match command {
        Commands::Chat {
            message,
            resume,
            yolo,
        } => {
            commands::chat::run(commands::chat::ChatOptions {
                message,
                resume,
                yolo,
                verbose: cli.verbose,
            })
            .await?
        }
        Commands::Sessions { command } => match command {
            SessionsCommand::List => commands::sessions::list().await?,
            SessionsCommand::Delete { id } => commands::sessions::delete(&id).await?,
        },
        Commands::Init => commands::init::run().await?,
    }

    Ok(())
}
