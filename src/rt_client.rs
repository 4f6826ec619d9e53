//! HTTP client for the RT REST 1.0 API.
//!
//! This module provides the `RtClient` struct for making authenticated
//! requests against a Request Tracker server.
//!
//! # Wire format
//!
//! Every request is a `POST` whose body carries the credentials as
//! `user=<username>&pass=<password>`, verbatim. Responses are plain text:
//! a status line (`RT/4.4.3 200 Ok`), a blank line, then the payload.
//!
//! Two endpoints are used:
//!
//! - `/REST/1.0/ticket/<id>/show`, with the path percent-encoded twice
//! - `/REST/1.0/search/ticket?query=<query>`, where only spaces are escaped
//!   and every other character goes on the request line as typed
//!
//! # Security
//!
//! The password is never logged. Server output that ends up in an error is
//! sanitized first, since RT may echo the request body back.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use http::StatusCode;
use url::Url;

use crate::config::{Config, DEFAULT_TIMEOUT_SECS};
use crate::error::QrtError;
use crate::models::{SearchOutcome, SearchResponse, Ticket};
use crate::transport::{self, Connection, Endpoint};

/// Path prefix of every REST 1.0 endpoint.
const REST_PREFIX: &str = "/REST/1.0";

/// Maximum length for HTTP error response bodies carried in errors.
const MAX_ERROR_BODY_LEN: usize = 500;

/// HTTP client for one RT server.
///
/// The underlying connection is opened lazily by the first request and
/// closed when the client is dropped.
///
/// # Example
///
/// ```ignore
/// let client = RtClient::connect("rt.example.org", false, None, "alice", "s3cret")?;
/// let text = client.fetch_ticket(1234).await?;
/// ```
pub struct RtClient {
    /// The single connection to the server.
    connection: Connection,

    /// Server host name, possibly with a port.
    host: String,

    /// Trust anchor used for HTTPS.
    cacert: Option<PathBuf>,

    /// `https://<host>` or `http://<host>`.
    base_url: String,

    username: String,

    /// SECURITY: Never log this value!
    password: String,

    /// Bound on each request, connecting included.
    timeout: Duration,
}

impl fmt::Debug for RtClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtClient")
            .field("host", &self.host)
            .field("cacert", &self.cacert)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RtClient {
    /// Creates a client from a loaded configuration.
    ///
    /// # Errors
    ///
    /// See [`RtClient::connect`].
    pub fn new(config: &Config) -> Result<Self, QrtError> {
        Self::build(
            &config.host,
            config.use_tls(),
            config.cacert.as_deref(),
            &config.username,
            config.password(),
            config.timeout,
        )
    }

    /// Creates a client for `server` with the default timeout.
    ///
    /// With `use_tls` set, `cacert` must name a PEM file; its certificates
    /// become the only trust anchors and the server certificate is always
    /// verified against them.
    ///
    /// # Errors
    ///
    /// - `QrtError::InvalidArgument` if `server` is empty or not a valid host.
    /// - `QrtError::Connection` if TLS is requested and the trust anchor is
    ///   missing, unreadable or contains no certificate. This is checked
    ///   before any network I/O.
    pub fn connect(
        server: &str,
        use_tls: bool,
        cacert: Option<&Path>,
        username: &str,
        password: &str,
    ) -> Result<Self, QrtError> {
        Self::build(
            server,
            use_tls,
            cacert,
            username,
            password,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    fn build(
        server: &str,
        use_tls: bool,
        cacert: Option<&Path>,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, QrtError> {
        let server = server.trim();
        if server.is_empty() {
            return Err(QrtError::invalid_argument(
                "server host name must not be empty",
            ));
        }

        let tls = if use_tls {
            let path = cacert.ok_or_else(|| {
                QrtError::connection(
                    "encrypted transport requested but no trust anchor (cacert) given",
                )
            })?;
            Some(transport::tls_connector(path)?)
        } else {
            None
        };

        let scheme = if use_tls { "https" } else { "http" };
        let base_url = format!("{}://{}", scheme, server);
        let parsed = Url::parse(&base_url).map_err(|e| {
            QrtError::invalid_argument(format!("invalid server host name {:?}: {}", server, e))
        })?;
        let connection = Connection::new(Endpoint::new(&parsed, tls)?);

        tracing::debug!(
            base_url = %base_url,
            authority = connection.endpoint().authority(),
            tls = use_tls,
            "RT client initialized"
        );

        Ok(Self {
            connection,
            host: server.to_string(),
            cacert: cacert.filter(|_| use_tls).map(Path::to_path_buf),
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            timeout,
        })
    }

    /// Base URL of the server, e.g. `https://rt.example.org`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether requests go over HTTPS.
    pub fn use_tls(&self) -> bool {
        self.cacert.is_some()
    }

    /// Returns the web URL for viewing a ticket in the RT UI.
    pub fn ticket_url(&self, ticket_id: u64) -> String {
        format!("{}/Ticket/Display.html?id={}", self.base_url, ticket_id)
    }

    /// Credentials as sent in every request body.
    fn auth_body(&self) -> String {
        format!("user={}&pass={}", self.username, self.password)
    }

    /// Escapes a search query the way RT expects it.
    ///
    /// Only spaces become `%20`. Quotes, comparison operators and the like
    /// are part of RT's query grammar and must reach the server as typed.
    pub fn encode_query(query: &str) -> String {
        query.replace(' ', "%20")
    }

    /// Request target for showing a ticket.
    fn ticket_target(&self, ticket_id: u64) -> String {
        let path = format!("{}/ticket/{}/show", REST_PREFIX, ticket_id);
        // Quoted twice to match what existing RT deployments have always
        // received. A no-op for numeric ids; confirm against a live server
        // before changing it.
        let path = quote_path(&quote_path(&path));
        format!("{}{}", self.connection.endpoint().prefix(), path)
    }

    /// Request target for a search.
    fn search_target(&self, query: &str) -> String {
        let path = format!("{}/search/ticket?query={}", REST_PREFIX, query);
        format!(
            "{}{}",
            self.connection.endpoint().prefix(),
            Self::encode_query(&path)
        )
    }

    /// Fetches the raw text of a ticket.
    ///
    /// The response is returned untouched, status preamble included. RT
    /// reports unknown tickets inside that text, so no not-found detection
    /// happens here.
    ///
    /// # Errors
    ///
    /// - `QrtError::InvalidArgument` if `ticket_id` is zero.
    /// - `QrtError::Connection`, `QrtError::Timeout`, `QrtError::Io`,
    ///   `QrtError::Protocol` or `QrtError::HttpStatus` if the request fails.
    pub async fn fetch_ticket(&self, ticket_id: u64) -> Result<String, QrtError> {
        if ticket_id == 0 {
            return Err(QrtError::invalid_argument(
                "ticket id must be a positive integer",
            ));
        }

        let target = self.ticket_target(ticket_id);
        self.post(&target, "fetch_ticket").await
    }

    /// Runs an RT search and returns the matching tickets in server order.
    ///
    /// # Errors
    ///
    /// - `QrtError::InvalidArgument` if the query contains control characters.
    /// - `QrtError::Parse` if the response is truncated or any result line
    ///   is not `<id>: <name>`. No partial result is returned.
    /// - `QrtError::Connection`, `QrtError::Timeout`, `QrtError::Io`,
    ///   `QrtError::Protocol` or `QrtError::HttpStatus` if the request fails.
    pub async fn search_tickets(&self, query: &str) -> Result<SearchOutcome<'_>, QrtError> {
        let target = self.search_target(query);
        let body = self.post(&target, "search_tickets").await?;

        match SearchResponse::parse(&body)? {
            SearchResponse::NoMatches => {
                tracing::debug!("RT has no matching results");
                Ok(SearchOutcome::NoMatches)
            }
            SearchResponse::Rows(rows) => {
                tracing::debug!(count = rows.len(), "Parsed search results");
                let tickets = rows
                    .into_iter()
                    .map(|row| Ticket::new(self, row.id, row.name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SearchOutcome::Tickets(tickets))
            }
        }
    }

    /// POSTs the credential body to `target` and returns the response text.
    async fn post(&self, target: &str, operation: &str) -> Result<String, QrtError> {
        tracing::debug!(operation = operation, target = %target, "Making RT API request");

        let body = self.auth_body();
        let exchange = self.connection.post(target, body.as_bytes());
        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| QrtError::timeout(self.timeout, operation))??;

        let text = String::from_utf8_lossy(&response.body).into_owned();

        if !response.status.is_success() {
            return Err(self.http_error(response.status, &text));
        }

        if let Some(status_line) = text.lines().next() {
            tracing::debug!(status_line = %status_line, "RT API response");
        }
        tracing::trace!(
            body = %QrtError::sanitize_message(&text, &self.password),
            "RT API response body"
        );

        Ok(text)
    }

    /// Converts a non-success HTTP response into an error.
    fn http_error(&self, status: StatusCode, body: &str) -> QrtError {
        let body = QrtError::sanitize_message(body, &self.password);
        let body = if body.len() > MAX_ERROR_BODY_LEN {
            let cut = (0..=MAX_ERROR_BODY_LEN)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            format!("{}...[truncated]", &body[..cut])
        } else {
            body
        };

        tracing::warn!(status = %status, "RT server returned an HTTP error");
        QrtError::HttpStatus { status, body }
    }

    /// Creates a plain-HTTP client pointing at an arbitrary base URL.
    #[cfg(test)]
    pub(crate) fn for_tests(base_url: &str) -> Self {
        let parsed = Url::parse(base_url).unwrap();
        Self {
            connection: Connection::new(Endpoint::new(&parsed, None).unwrap()),
            host: "test".to_string(),
            cacert: None,
            base_url: base_url.to_string(),
            username: "test_user".to_string(),
            password: "test_pass".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Percent-encodes a URL path, keeping `/` and unreserved characters.
fn quote_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}
