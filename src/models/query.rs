//! Classification of the command-line argument.

use crate::error::QrtError;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Show a single ticket.
    Ticket(u64),
    /// Run an RT search with this query text.
    Search(String),
}

impl Query {
    /// Classifies `input`.
    ///
    /// Anything that reads as an integer (surrounding whitespace and a
    /// leading sign allowed) is a ticket id; everything else is passed to
    /// search unchanged.
    ///
    /// # Errors
    ///
    /// Returns `QrtError::InvalidArgument` for integers that cannot be a
    /// ticket id: zero, negative, or too large.
    pub fn parse(input: &str) -> Result<Self, QrtError> {
        let trimmed = input.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Query::Search(input.to_string()));
        }

        match digits.parse::<u64>() {
            Ok(id) if id > 0 && !negative => Ok(Query::Ticket(id)),
            Ok(_) => Err(QrtError::invalid_argument(format!(
                "ticket id must be a positive integer, got {}",
                trimmed
            ))),
            Err(_) => Err(QrtError::invalid_argument(format!(
                "ticket id {} is out of range",
                trimmed
            ))),
        }
    }
}
