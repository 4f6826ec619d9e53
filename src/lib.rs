//! # qrt
//!
//! qrt is a small command-line client for the Request Tracker (RT) REST 1.0
//! API. Given one argument it either shows a ticket by id or runs an RT
//! search and lists the matching tickets as Markdown links.
//!
//! ## Architecture
//!
//! - [`config`] - Loading `~/.qrt_config`
//! - [`error`] - Error type with password sanitization
//! - [`rt_client`] - RT client: authentication, URL encoding, the two requests
//! - `transport` - HTTP/1.1 over TCP or TLS, sending request targets verbatim
//! - [`models`] - Ticket record, search response parser, input classification
//!
//! ## Security Considerations
//!
//! RT 1.0 authenticates through `user=...&pass=...` in the request body. The
//! password is kept in memory only and is:
//! - Never logged at any log level
//! - Redacted from `Debug` output
//! - Sanitized from error messages built from server output
//!
//! ## Example
//!
//! ```ignore
//! use qrt::config::Config;
//! use qrt::models::{Query, SearchOutcome};
//! use qrt::rt_client::RtClient;
//!
//! async fn example() -> Result<(), qrt::error::QrtError> {
//!     let config = Config::load(&Config::default_path()?)?;
//!     let client = RtClient::new(&config)?;
//!
//!     match Query::parse("Status = 'new'")? {
//!         Query::Ticket(id) => println!("{}", client.fetch_ticket(id).await?),
//!         Query::Search(q) => {
//!             if let SearchOutcome::Tickets(tickets) = client.search_tickets(&q).await? {
//!                 for ticket in tickets {
//!                     println!("{}", ticket.markdown(true));
//!                 }
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod models;
pub mod rt_client;
mod transport;
