//! qrt - query a Request Tracker server
//!
//! Shows a ticket when given an integer, otherwise runs the argument as an
//! RT search and prints each hit as a Markdown link.
//!
//! # Configuration
//!
//! Settings are read from `~/.qrt_config`, or from the file named by
//! `QRT_CONFIG` (a `.env` file is honoured). See [`qrt::config`] for the format.
//!
//! # Usage
//!
//! ```bash
//! qrt 1234
//! qrt "Queue = 'General' AND Status = 'new'"
//!
//! # Verbose logging on stderr
//! RUST_LOG=qrt=debug qrt 1234
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use qrt::config::Config;
use qrt::models::{Query, SearchOutcome};
use qrt::rt_client::RtClient;

/// Default log filter when neither `RUST_LOG` nor `log_level` is set.
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Parser)]
#[command(name = "qrt", version, about = "Query a Request Tracker server")]
struct Cli {
    /// An integer ticket ID or a search query string.
    query: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file if present (ignore errors if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config_path = Config::default_path().context("Failed to locate configuration")?;
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    init_logging(&config);

    tracing::debug!(config = ?config, path = %config_path.display(), "Configuration loaded");

    let query = Query::parse(&cli.query).context("Invalid query")?;

    // Dropped at the end of main, which closes the connection.
    let client = RtClient::new(&config).context("Failed to set up RT client")?;

    match query {
        Query::Ticket(id) => {
            let text = client
                .fetch_ticket(id)
                .await
                .with_context(|| format!("Failed to fetch ticket {}", id))?;
            println!("{}", text);
        }
        Query::Search(query) => {
            let outcome = client
                .search_tickets(&query)
                .await
                .context("Search failed")?;
            if let SearchOutcome::Tickets(tickets) = outcome {
                for ticket in &tickets {
                    println!("{}", ticket.markdown(false));
                }
            }
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout carries only ticket output.
fn init_logging(config: &Config) {
    let level = config.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("qrt={}", level))),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
