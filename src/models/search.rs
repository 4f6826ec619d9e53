//! Search response models for the RT REST 1.0 API.
//!
//! A search response is plain text:
//!
//! ```text
//! RT/4.4.3 200 Ok
//!
//! 101: Fix login bug
//! 202: Update docs
//! ```
//!
//! or, when nothing matches, the same preamble followed by
//! `No matching results.`.

use crate::error::QrtError;

use super::Ticket;

/// Line RT sends instead of results when a search matches nothing.
pub const NO_MATCHES_SENTINEL: &str = "No matching results.";

/// Number of status lines preceding the payload.
const PREAMBLE_LINES: usize = 2;

/// One `<id>: <name>` line of a search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRow {
    /// Ticket id.
    pub id: u64,
    /// Ticket subject; may be empty.
    pub name: String,
}

impl SearchRow {
    /// Parses a single result line. Returns `None` if it is not `<digits>: <rest>`.
    pub fn parse(line: &str) -> Option<Self> {
        let (id, name) = line.split_once(": ")?;
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(SearchRow {
            id: id.parse().ok()?,
            name: name.to_string(),
        })
    }
}

/// Parsed body of a search response, before tickets are attached to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResponse {
    /// RT reported `No matching results.`.
    NoMatches,
    /// Result rows in server order.
    Rows(Vec<SearchRow>),
}

impl SearchResponse {
    /// Parses a full response body.
    ///
    /// # Errors
    ///
    /// Returns `QrtError::Parse` if nothing follows the preamble, or if any
    /// non-empty line is not `<id>: <name>`. One bad line fails the whole
    /// response.
    pub fn parse(body: &str) -> Result<Self, QrtError> {
        let mut lines = body.lines().enumerate().skip(PREAMBLE_LINES).peekable();

        match lines.peek() {
            None => {
                return Err(QrtError::Parse(
                    "response ended before any search result".to_string(),
                ))
            }
            Some((_, first)) if *first == NO_MATCHES_SENTINEL => {
                return Ok(SearchResponse::NoMatches)
            }
            Some(_) => {}
        }

        let mut rows = Vec::new();
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let row = SearchRow::parse(line)
                .ok_or_else(|| QrtError::malformed_line(idx + 1, line))?;
            rows.push(row);
        }

        Ok(SearchResponse::Rows(rows))
    }
}

/// Result of a ticket search.
///
/// `NoMatches` is RT's explicit "nothing found" answer and is kept distinct
/// from an empty `Tickets` list.
#[derive(Debug)]
pub enum SearchOutcome<'c> {
    /// The server reported no matching tickets.
    NoMatches,
    /// Matching tickets in server order.
    Tickets(Vec<Ticket<'c>>),
}
