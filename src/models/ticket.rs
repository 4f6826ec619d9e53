//! Ticket model.
//!
//! A `Ticket` is one search hit: id, subject and the client it came from,
//! which supplies the base URL for links into the RT web UI.

use std::fmt;

use crate::error::QrtError;
use crate::rt_client::RtClient;

/// A ticket returned by an RT search.
///
/// Borrows the client that produced it and cannot outlive it.
#[derive(Debug, Clone)]
pub struct Ticket<'c> {
    id: u64,
    name: String,
    client: &'c RtClient,
}

impl<'c> Ticket<'c> {
    /// Creates a ticket belonging to `client`.
    ///
    /// # Errors
    ///
    /// Returns `QrtError::InvalidArgument` if `id` is zero.
    pub fn new(client: &'c RtClient, id: u64, name: impl Into<String>) -> Result<Self, QrtError> {
        if id == 0 {
            return Err(QrtError::invalid_argument(
                "tried to create a ticket without a ticket id",
            ));
        }
        Ok(Self {
            id,
            name: name.into(),
            client,
        })
    }

    /// Ticket id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ticket subject as reported by the server. May be empty.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Link to the ticket in the RT web UI.
    pub fn url(&self) -> String {
        self.client.ticket_url(self.id)
    }

    /// Renders the ticket as a Markdown link, optionally as a list item.
    ///
    /// ```text
    /// [Fix bug](https://rt/Ticket/Display.html?id=101)
    /// - [Fix bug](https://rt/Ticket/Display.html?id=101)
    /// ```
    pub fn markdown(&self, bulleted: bool) -> String {
        let link = format!("[{}]({})", self.name, self.url());
        if bulleted {
            format!("- {}", link)
        } else {
            link
        }
    }
}

impl fmt::Display for Ticket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.name)
    }
}
