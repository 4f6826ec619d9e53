//! Data models for the RT REST 1.0 API.
//!
//! This module contains the ticket record, the parsed search response and
//! the classification of user input into a ticket id or a search query.

mod query;
mod search;
mod ticket;

pub use query::*;
pub use search::*;
pub use ticket::*;
