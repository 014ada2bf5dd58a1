#![cfg_attr(not(test), forbid(unsafe_code))]

//! Main entry point for the LexLink relay server CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;
use std::error::Error;
use std::path::PathBuf;
use utoipa::OpenApi;

/// Main CLI structure for the LexLink relay server.
#[derive(Parser)]
#[command(name = "lexlink-server")]
#[command(about = "Streaming chat relay for the LexLink legal assistant", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the LexLink relay server CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    Serve {
        /// Port to bind the server to, overriding the configuration file
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to the configuration file (config.yaml or config.json)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Print the OpenAPI document as JSON and exit
    Openapi,
}

/// Initializes environment variables and returns the parsed CLI.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Handles the serve command by loading configuration and starting the server.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let resolved_config = Config::load_config(config, port)?;
    server::server::run(resolved_config)
        .await
        .map_err(|err| -> Box<dyn Error> { err.into() })?;
    Ok(())
}

/// Main application entry point.
///
/// # Errors
/// Returns an error if the application fails to initialize or run.
pub async fn run_app() -> Result<(), Box<dyn Error>> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Serve { port, config } => {
            handle_serve_command(port, config).await?;
        }
        Commands::Openapi => {
            println!("{}", server::openapi::ApiDoc::openapi().to_pretty_json()?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    run_app().await
}
