//! HTTP/1.1 exchange over a single TCP or TLS stream.
//!
//! RT's search grammar needs `'`, `"`, `<` and `>` to reach the server as
//! typed. URI types in the usual HTTP stacks refuse to carry those bytes
//! unescaped, so the request line is written here with the request target
//! passed through byte-for-byte. Response heads are parsed with `httparse`;
//! bodies may be `Content-Length` framed, chunked, or delimited by close.
//!
//! The stream is opened by the first request, kept for the next one while
//! the server allows keep-alive, and closed when the `Connection` is dropped.

use std::io;
use std::path::Path;
use std::sync::Arc;

use http::StatusCode;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use url::{Host, Url};

use crate::error::QrtError;

/// Maximum number of response headers accepted.
const MAX_HEADERS: usize = 64;

/// Maximum size of a response head, and of a single chunk-size line.
const MAX_HEAD_LEN: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

type BoxedStream = Box<dyn Stream>;

/// Builds a TLS connector that trusts only the certificates in `path`.
///
/// # Errors
///
/// Returns `QrtError::Connection` if the file cannot be read, holds no PEM
/// certificate, or holds one that is not a valid trust anchor.
pub fn tls_connector(path: &Path) -> Result<TlsConnector, QrtError> {
    let pem = std::fs::read(path).map_err(|e| {
        QrtError::connection(format!(
            "cannot read trust anchor {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(&pem) {
        let cert = cert.map_err(|e| {
            QrtError::connection(format!("invalid trust anchor {}: {}", path.display(), e))
        })?;
        roots.add(cert).map_err(|e| {
            QrtError::connection(format!("invalid trust anchor {}: {}", path.display(), e))
        })?;
    }
    if roots.is_empty() {
        return Err(QrtError::connection(format!(
            "trust anchor {} contains no PEM certificate",
            path.display()
        )));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| QrtError::connection(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Where requests are sent.
#[derive(Clone)]
pub struct Endpoint {
    /// Host to connect to; IPv6 literals without brackets.
    host: String,
    port: u16,
    /// Value of the `Host` header.
    authority: String,
    /// Path prefix of the RT installation, without trailing slash.
    prefix: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Endpoint {
    /// Derives the endpoint from a base URL such as `https://rt.example.org:8443/rt`.
    ///
    /// # Errors
    ///
    /// Returns `QrtError::InvalidArgument` if the URL has no host or the host
    /// is not usable as a TLS server name.
    pub fn new(base_url: &Url, tls: Option<TlsConnector>) -> Result<Self, QrtError> {
        let host_str = base_url
            .host_str()
            .ok_or_else(|| QrtError::invalid_argument(format!("{} has no host", base_url)))?;
        let host = match base_url.host() {
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => host_str.to_string(),
        };
        let port = base_url.port_or_known_default().ok_or_else(|| {
            QrtError::invalid_argument(format!("{} has no port", base_url))
        })?;
        let authority = match base_url.port() {
            Some(port) => format!("{}:{}", host_str, port),
            None => host_str.to_string(),
        };
        let prefix = base_url.path().trim_end_matches('/').to_string();

        let tls = match tls {
            Some(connector) => {
                let name = ServerName::try_from(host.clone()).map_err(|e| {
                    QrtError::invalid_argument(format!("invalid TLS server name {:?}: {}", host, e))
                })?;
                Some((connector, name))
            }
            None => None,
        };

        Ok(Self {
            host,
            port,
            authority,
            prefix,
            tls,
        })
    }

    /// Path prefix to put in front of every request target.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `host` or `host:port`, as sent in the `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    async fn open(&self) -> Result<BoxedStream, QrtError> {
        tracing::debug!(
            host = %self.host,
            port = self.port,
            tls = self.tls.is_some(),
            "Connecting"
        );

        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| QrtError::connection(format!("cannot reach {}: {}", self.authority, e)))?;
        tcp.set_nodelay(true).ok();

        match &self.tls {
            None => Ok(Box::new(tcp) as BoxedStream),
            Some((connector, name)) => {
                let stream = connector.connect(name.clone(), tcp).await.map_err(|e| {
                    QrtError::connection(format!(
                        "TLS handshake with {} failed: {}",
                        self.authority, e
                    ))
                })?;
                Ok(Box::new(stream) as BoxedStream)
            }
        }
    }

    fn request_head(&self, target: &str, content_length: usize) -> String {
        format!(
            "POST {} HTTP/1.1\r\n\
             Host: {}\r\n\
             User-Agent: qrt/{}\r\n\
             Accept-Encoding: identity\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\
             \r\n",
            target,
            self.authority,
            env!("CARGO_PKG_VERSION"),
            content_length
        )
    }
}

/// A decoded HTTP response.
#[derive(Debug)]
pub struct Response {
    /// Status code.
    pub status: StatusCode,
    /// Body with transfer framing removed.
    pub body: Vec<u8>,
}

/// One lazily opened connection to an `Endpoint`.
pub struct Connection {
    endpoint: Endpoint,
    stream: Mutex<Option<BoxedStream>>,
}

impl Connection {
    /// Creates an unconnected connection; nothing is opened until `post`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stream: Mutex::new(None),
        }
    }

    /// The endpoint this connection talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Sends `POST <target>` with `body` and reads the full response.
    ///
    /// `target` goes on the request line exactly as given.
    ///
    /// # Errors
    ///
    /// - `QrtError::InvalidArgument` if `target` contains a space or control
    ///   character, checked before connecting.
    /// - `QrtError::Connection` if the server cannot be reached or the TLS
    ///   handshake fails.
    /// - `QrtError::Io` or `QrtError::Protocol` if the exchange breaks off or
    ///   the reply is not HTTP.
    pub async fn post(&self, target: &str, body: &[u8]) -> Result<Response, QrtError> {
        if target.is_empty() || target.bytes().any(|b| b == b' ' || b.is_ascii_control()) {
            return Err(QrtError::invalid_argument(format!(
                "request target {:?} contains spaces or control characters",
                target
            )));
        }

        let head = self.endpoint.request_head(target, body.len());
        let mut slot = self.stream.lock().await;

        if let Some(mut stream) = slot.take() {
            match exchange(&mut stream, &head, body).await {
                Ok((response, reusable)) => {
                    if reusable {
                        *slot = Some(stream);
                    }
                    return Ok(response);
                }
                // The server may have dropped an idle keep-alive connection.
                Err(e) => tracing::debug!(error = %e, "Reused connection failed, reconnecting"),
            }
        }

        let mut stream = self.endpoint.open().await?;
        let (response, reusable) = exchange(&mut stream, &head, body).await?;
        if reusable {
            *slot = Some(stream);
        }
        Ok(response)
    }
}

/// Writes one request and reads its response.
async fn exchange(
    stream: &mut BoxedStream,
    head: &str,
    body: &[u8],
) -> Result<(Response, bool), QrtError> {
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    read_response(stream).await
}

/// Parsed response head.
#[derive(Debug)]
struct Head {
    status: StatusCode,
    content_length: Option<usize>,
    chunked: bool,
    close: bool,
}

/// Parses a response head from the front of `buf`.
///
/// Returns the head and the number of bytes it occupies, or `None` if more
/// input is needed.
fn parse_head(buf: &[u8]) -> Result<Option<(Head, usize)>, QrtError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let consumed = match response.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(QrtError::protocol(e.to_string())),
    };

    let code = response
        .code
        .ok_or_else(|| QrtError::protocol("missing status code"))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| QrtError::protocol(format!("invalid status code {}", code)))?;

    let mut head = Head {
        status,
        content_length: None,
        chunked: false,
        // HTTP/1.0 closes unless told otherwise.
        close: response.version == Some(0),
    };

    for header in response.headers.iter() {
        let value = String::from_utf8_lossy(header.value);
        let value = value.trim();
        if header.name.eq_ignore_ascii_case("content-length") {
            let length = value.parse().map_err(|_| {
                QrtError::protocol(format!("invalid Content-Length {:?}", value))
            })?;
            head.content_length = Some(length);
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            head.chunked = value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        } else if header.name.eq_ignore_ascii_case("connection") {
            let value = value.to_ascii_lowercase();
            if value.contains("close") {
                head.close = true;
            } else if value.contains("keep-alive") {
                head.close = false;
            }
        }
    }

    Ok(Some((head, consumed)))
}

/// Reads one response. The flag tells whether the stream can carry another.
async fn read_response(stream: &mut BoxedStream) -> Result<(Response, bool), QrtError> {
    let mut buf = Vec::with_capacity(READ_CHUNK);

    let head = loop {
        match parse_head(&buf)? {
            Some((head, consumed)) => {
                buf.drain(..consumed);
                if head.status.is_informational() {
                    continue;
                }
                break head;
            }
            None => {
                if buf.len() > MAX_HEAD_LEN {
                    return Err(QrtError::protocol("response head too large"));
                }
                if fill(stream, &mut buf).await? == 0 {
                    return Err(QrtError::protocol(
                        "connection closed before a response was received",
                    ));
                }
            }
        }
    };

    let mut reusable = !head.close;
    let body = if head.status == StatusCode::NO_CONTENT || head.status == StatusCode::NOT_MODIFIED
    {
        Vec::new()
    } else if head.chunked {
        read_chunked(stream, &mut buf).await?
    } else if let Some(length) = head.content_length {
        while buf.len() < length {
            if fill(stream, &mut buf).await? == 0 {
                return Err(QrtError::protocol(format!(
                    "connection closed after {} of {} body bytes",
                    buf.len(),
                    length
                )));
            }
        }
        let rest = buf.split_off(length);
        reusable &= rest.is_empty();
        buf
    } else {
        while fill(stream, &mut buf).await? > 0 {}
        reusable = false;
        buf
    };

    tracing::trace!(status = %head.status, bytes = body.len(), "HTTP response read");

    Ok((
        Response {
            status: head.status,
            body,
        },
        reusable,
    ))
}

/// Decodes a chunked body, consuming the trailer section.
async fn read_chunked(stream: &mut BoxedStream, buf: &mut Vec<u8>) -> Result<Vec<u8>, QrtError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(stream, buf).await?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16)
            .map_err(|_| QrtError::protocol(format!("invalid chunk size {:?}", size)))?;

        if size == 0 {
            while !read_line(stream, buf).await?.is_empty() {}
            return Ok(body);
        }

        while buf.len() < size + 2 {
            if fill(stream, buf).await? == 0 {
                return Err(QrtError::protocol("connection closed inside a chunk"));
            }
        }
        if &buf[size..size + 2] != b"\r\n" {
            return Err(QrtError::protocol("chunk not terminated by CRLF"));
        }
        body.extend_from_slice(&buf[..size]);
        buf.drain(..size + 2);
    }
}

/// Takes one CRLF-terminated line off the front of `buf`, reading as needed.
async fn read_line(stream: &mut BoxedStream, buf: &mut Vec<u8>) -> Result<String, QrtError> {
    loop {
        if let Some(end) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = String::from_utf8_lossy(&buf[..end]).into_owned();
            buf.drain(..end + 2);
            return Ok(line);
        }
        if buf.len() > MAX_HEAD_LEN {
            return Err(QrtError::protocol("chunk header line too long"));
        }
        if fill(stream, buf).await? == 0 {
            return Err(QrtError::protocol("connection closed inside chunked body"));
        }
    }
}

/// Appends whatever the stream has to `buf`; 0 means end of stream.
async fn fill(stream: &mut BoxedStream, buf: &mut Vec<u8>) -> Result<usize, QrtError> {
    let mut chunk = [0u8; READ_CHUNK];
    match stream.read(&mut chunk).await {
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            Ok(n)
        }
        // Peers that drop TLS without close_notify.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
        Err(e) => Err(e.into()),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{http_response, serve_once};
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn connection_to(addr: &str) -> Connection {
        let url = Url::parse(&format!("http://{}", addr)).unwrap();
        Connection::new(Endpoint::new(&url, None).unwrap())
    }

    #[test]
    fn test_endpoint_from_url() {
        let url = Url::parse("https://rt.example.org:8443/rt/").unwrap();
        let endpoint = Endpoint::new(&url, None).unwrap();
        assert_eq!(endpoint.host, "rt.example.org");
        assert_eq!(endpoint.port, 8443);
        assert_eq!(endpoint.authority(), "rt.example.org:8443");
        assert_eq!(endpoint.prefix(), "/rt");

        let url = Url::parse("http://rt.example.org").unwrap();
        let endpoint = Endpoint::new(&url, None).unwrap();
        assert_eq!(endpoint.port, 80);
        assert_eq!(endpoint.authority(), "rt.example.org");
        assert_eq!(endpoint.prefix(), "");
    }

    #[test]
    fn test_endpoint_ipv6() {
        let url = Url::parse("http://[::1]:8080").unwrap();
        let endpoint = Endpoint::new(&url, None).unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.authority(), "[::1]:8080");
    }

    #[test]
    fn test_tls_connector_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            tls_connector(&dir.path().join("missing.pem")),
            Err(QrtError::Connection(_))
        ));

        let mut text = tempfile::NamedTempFile::new().unwrap();
        text.write_all(b"not a certificate\n").unwrap();
        assert!(matches!(
            tls_connector(text.path()),
            Err(QrtError::Connection(_))
        ));

        let mut bogus = tempfile::NamedTempFile::new().unwrap();
        bogus
            .write_all(b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n")
            .unwrap();
        assert!(matches!(
            tls_connector(bogus.path()),
            Err(QrtError::Connection(_))
        ));
    }

    #[test]
    fn test_parse_head_partial_and_complete() {
        assert!(parse_head(b"HTTP/1.1 200 OK\r\nContent-Le").unwrap().is_none());

        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";
        let (head, consumed) = parse_head(raw).unwrap().unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.content_length, Some(5));
        assert!(head.close);
        assert!(!head.chunked);
        assert_eq!(&raw[consumed..], b"hello");
    }

    #[test]
    fn test_parse_head_rejects_garbage() {
        assert!(matches!(
            parse_head(b"garbage\r\n\r\n"),
            Err(QrtError::Protocol(_))
        ));
        assert!(matches!(
            parse_head(b"HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\n"),
            Err(QrtError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_request_is_written_verbatim() {
        let (addr, handle) = serve_once(http_response("200 OK", "done")).await;
        let connection = connection_to(&addr);

        let response = connection
            .post("/q?x='a'<b>\"c\"", b"user=u&pass=p")
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"done");

        let request = handle.await.unwrap();
        let expected_head = format!(
            "POST /q?x='a'<b>\"c\" HTTP/1.1\r\n\
             Host: {}\r\n\
             User-Agent: qrt/{}\r\n\
             Accept-Encoding: identity\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: 13\r\n\
             \r\n\
             user=u&pass=p",
            addr,
            env!("CARGO_PKG_VERSION")
        );
        assert_eq!(request, expected_head);
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let raw = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                   5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let (addr, _handle) = serve_once(raw.to_string()).await;

        let response = connection_to(&addr).post("/", b"").await.unwrap();
        assert_eq!(response.body, b"hello world");
    }

    #[tokio::test]
    async fn test_body_delimited_by_close() {
        let raw = "HTTP/1.0 200 OK\r\n\r\nRT/4.4.3 200 Ok\n\nuntil close\n";
        let (addr, _handle) = serve_once(raw.to_string()).await;

        let response = connection_to(&addr).post("/", b"").await.unwrap();
        assert_eq!(response.body, b"RT/4.4.3 200 Ok\n\nuntil close\n");
    }

    #[tokio::test]
    async fn test_informational_response_is_skipped() {
        let raw = format!(
            "HTTP/1.1 100 Continue\r\n\r\n{}",
            http_response("200 OK", "after continue")
        );
        let (addr, _handle) = serve_once(raw).await;

        let response = connection_to(&addr).post("/", b"").await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"after continue");
    }

    #[tokio::test]
    async fn test_truncated_body_is_protocol_error() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort";
        let (addr, _handle) = serve_once(raw.to_string()).await;

        let err = connection_to(&addr).post("/", b"").await.unwrap_err();
        assert!(matches!(err, QrtError::Protocol(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_reconnects_after_idle_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Two connections, each answering one request and then closing
        // without a `Connection: close` header.
        let server = tokio::spawn(async move {
            for reply in ["first", "second"] {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    assert!(n > 0);
                    request.extend_from_slice(&chunk[..n]);
                }
                socket
                    .write_all(http_response("200 OK", reply).as_bytes())
                    .await
                    .unwrap();
                socket.shutdown().await.ok();
            }
        });

        let connection = connection_to(&addr);
        assert_eq!(connection.post("/a", b"").await.unwrap().body, b"first");
        assert_eq!(connection.post("/b", b"").await.unwrap().body, b"second");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_target_with_control_characters_is_rejected() {
        // Nothing listens here; the check must fire before connecting.
        let connection = connection_to("127.0.0.1:9");
        for target in ["/a\r\nHost: evil", "/a b", ""] {
            let err = connection.post(target, b"").await.unwrap_err();
            assert!(matches!(err, QrtError::InvalidArgument(_)), "target {:?}", target);
        }
    }
}
