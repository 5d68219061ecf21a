use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use boardsync::config::{BoardsyncConfig, DEFAULT_DB_PATH};
use boardsync::server;
use boardsync::store::TaskDb;

#[derive(Parser)]
#[command(name = "boardsync")]
#[command(version, about = "Team task tracker mirrored from a kanban board")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Path to the config file (defaults to boardsync.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the SQLite database (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Manage local users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user (or look one up) and issue a fresh API token
    Add {
        email: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            config,
            db_path,
        } => {
            let mut cfg = BoardsyncConfig::load(config.as_deref())?;
            if let Some(port) = port {
                cfg.port = port;
            }
            if let Some(db_path) = db_path {
                cfg.db_path = db_path;
            }
            server::start_server(cfg).await
        }
        Commands::User {
            command: UserCommands::Add {
                email,
                name,
                db_path,
            },
        } => {
            let db = TaskDb::new(&db_path)?;
            let (user, token) = db.issue_api_token(&email, name.as_deref().unwrap_or(""))?;
            println!("User {} (id {})", user.email, user.id);
            println!("API token: {}", token);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "debug"
    } else {
        "info,boardsync=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
