//! User Service - TCP server for user management.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use user_service_lib::config::UserServiceConfig;
use user_service_lib::MigrateAction;

#[derive(Parser)]
#[command(name = "user-service")]
#[command(about = "User management microservice")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the TCP server
    Serve {
        /// Interface to bind (default: all)
        #[arg(short = 'H', long, env = "USER_SERVICE_HOST")]
        host: Option<String>,
        /// Port to listen on (default: 3001)
        #[arg(short, long, env = "USER_SERVICE_PORT")]
        port: Option<u16>,
    },
    /// Database migration commands
    Migrate {
        #[command(subcommand)]
        action: MigrateCommands,
    },
    /// Print the effective configuration (credentials redacted)
    Config,
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Run pending migrations
    Up,
    /// Rollback last migration
    Down,
    /// Show migration status
    Status,
    /// Reset database and run all migrations
    Fresh,
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Commands::Serve { host, port } => serve(host, port).await,
        Commands::Migrate { action } => {
            let action = match action {
                MigrateCommands::Up => MigrateAction::Up,
                MigrateCommands::Down => MigrateAction::Down,
                MigrateCommands::Status => MigrateAction::Status,
                MigrateCommands::Fresh => MigrateAction::Fresh,
            };
            migrate(action).await
        }
        Commands::Config => match UserServiceConfig::from_env() {
            Ok(config) => {
                println!("{:#?}", config);
                0
            }
            Err(e) => {
                tracing::error!("Invalid configuration: {}", e);
                1
            }
        },
    };

    std::process::exit(code);
}

async fn serve(host: Option<String>, port: Option<u16>) -> i32 {
    let config = match UserServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return 1;
        }
    };
    let config = match listen_override(host, port, &config.listen_addr) {
        Some(addr) => config.with_listen_addr(addr),
        None => config,
    };
    tracing::debug!(config = ?config, "Configuration loaded");

    match user_service_lib::serve(config).await {
        Ok(report) => {
            if report.is_success() {
                tracing::info!("{}", report.status_line());
            } else {
                tracing::error!("{}", report.status_line());
            }
            report.exit_code()
        }
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            1
        }
    }
}

async fn migrate(action: MigrateAction) -> i32 {
    let database = match UserServiceConfig::database_from_env() {
        Ok(database) => database,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return 1;
        }
    };

    match user_service_lib::run_migrations(&database, action).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("Migration failed: {}", e);
            1
        }
    }
}

/// CLI flags win over the configured address; a lone host keeps its port.
fn listen_override(host: Option<String>, port: Option<u16>, current: &str) -> Option<String> {
    match (host, port) {
        (None, None) => None,
        (host, Some(port)) => Some(format!(
            "{}:{}",
            host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port
        )),
        (Some(host), None) => current
            .rsplit_once(':')
            .map(|(_, port)| format!("{}:{}", host, port)),
    }
}

/// Initialize tracing subscriber
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
