//! Framed HTTP/1.1 codec for tunnel endpoints.
//!
//! An endpoint in framed mode carries a strict interleaving of one request
//! followed by one response. Both sides parse message heads with `httparse`
//! and consume the body according to its framing (Content-Length, chunked,
//! or none). All reads go through the caller's long-lived buffered reader
//! and consume exactly the bytes of the current message, so residue from
//! pipelined bytes stays buffered for the next exchange. Bodies are decoded
//! in full, so the writers always emit plain Content-Length framing; headers
//! are otherwise forwarded verbatim, multi-valued headers preserved in
//! order.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Maximum number of headers accepted in one message head.
const MAX_HEADERS: usize = 100;

/// Upper bound on the size of a message head (request line + headers).
const MAX_HEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("message head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,

    #[error("malformed message head: {0}")]
    Parse(String),

    #[error("invalid Content-Length: {0}")]
    BadContentLength(String),

    #[error("malformed chunked body: {0}")]
    BadChunk(String),

    #[error("connection closed mid-message")]
    UnexpectedEof,
}

/// One parsed HTTP/1.1 request with a fully decoded body.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Origin-form request target (path plus optional query).
    pub target: String,
    /// HTTP/1.x minor version as reported by httparse.
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One parsed or synthesized HTTP/1.1 response with a fully decoded body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// True when the body was delimited by connection close; the sending
    /// connection cannot carry another framed exchange.
    pub close_delimited: bool,
}

impl Request {
    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether this request asks for a WebSocket protocol upgrade.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade").map(str::trim) == Some("websocket")
    }

    /// Whether the client connection should close after the exchange.
    pub fn wants_close(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => true,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => false,
            _ => self.version == 0,
        }
    }
}

impl Response {
    /// Synthesize a response with no headers and no body.
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            version: 1,
            headers: Vec::new(),
            body: Vec::new(),
            close_delimited: false,
        }
    }

    /// Synthesize a plain-text response, the shape used for error bodies.
    pub fn text(status: u16, reason: &str, body: &str) -> Self {
        Self::new(status, reason)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.as_bytes().to_vec())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Statuses that never carry a body (RFC 7230 §3.3.3).
fn no_body_status(status: u16) -> bool {
    matches!(status, 100..=199 | 204 | 304)
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Locate the head terminator in `head ++ chunk`, where `head` has already
/// been scanned. Returns the absolute end index (one past `\r\n\r\n`).
fn find_head_end_spanning(head: &[u8], chunk: &[u8]) -> Option<usize> {
    let tail_start = head.len().saturating_sub(3);
    let mut window = Vec::with_capacity(head.len() - tail_start + chunk.len());
    window.extend_from_slice(&head[tail_start..]);
    window.extend_from_slice(chunk);
    find_head_end(&window).map(|end| tail_start + end)
}

/// Read exactly one message head into an owned buffer, consuming nothing
/// past the terminator. Returns `None` on a clean EOF before any byte.
async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, HttpError> {
    let mut head: Vec<u8> = Vec::new();
    loop {
        let (take, done) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                if head.is_empty() {
                    return Ok(None);
                }
                return Err(HttpError::UnexpectedEof);
            }
            match find_head_end_spanning(&head, chunk) {
                Some(end) => {
                    let take = end - head.len();
                    head.extend_from_slice(&chunk[..take]);
                    (take, true)
                }
                None => {
                    head.extend_from_slice(chunk);
                    (chunk.len(), false)
                }
            }
        };
        reader.consume(take);
        if done {
            return Ok(Some(head));
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(HttpError::HeadTooLarge);
        }
    }
}

/// How the body of a parsed message is delimited.
enum BodyFraming {
    None,
    Length(usize),
    Chunked,
    /// No length information; body runs until the peer closes.
    Close,
}

fn body_framing(
    headers: &[(String, String)],
    is_response: bool,
    status: u16,
) -> Result<BodyFraming, HttpError> {
    if is_response && no_body_status(status) {
        return Ok(BodyFraming::None);
    }

    let mut length = None;
    let mut chunked = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("content-length") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| HttpError::BadContentLength(value.clone()))?;
            length = Some(parsed);
        }
        if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            chunked = true;
        }
    }

    if chunked {
        Ok(BodyFraming::Chunked)
    } else if let Some(n) = length {
        Ok(BodyFraming::Length(n))
    } else if is_response {
        Ok(BodyFraming::Close)
    } else {
        // A request without framing headers has no body.
        Ok(BodyFraming::None)
    }
}

async fn read_exact_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    n: usize,
) -> Result<Vec<u8>, HttpError> {
    let mut body = vec![0u8; n];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            HttpError::UnexpectedEof
        } else {
            HttpError::Io(e)
        }
    })?;
    Ok(body)
}

/// One CRLF-terminated line, returned without the terminator.
async fn read_crlf_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, HttpError> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 || line.last() != Some(&b'\n') {
        return Err(HttpError::UnexpectedEof);
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    if line.len() > MAX_HEAD_BYTES {
        return Err(HttpError::BadChunk("oversized chunk line".into()));
    }
    Ok(line)
}

/// Decode a chunked body; trailers are consumed and discarded.
async fn read_chunked_body<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, HttpError> {
    let mut body = Vec::new();
    loop {
        let line = read_crlf_line(reader).await?;
        let size_str = std::str::from_utf8(&line)
            .map_err(|_| HttpError::BadChunk("non-UTF-8 chunk size".into()))?;
        let size_str = size_str.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| HttpError::BadChunk(format!("bad chunk size {size_str:?}")))?;
        if size == 0 {
            // Trailer section runs until the terminating empty line.
            loop {
                if read_crlf_line(reader).await?.is_empty() {
                    return Ok(body);
                }
            }
        }
        body.extend_from_slice(&read_exact_body(reader, size).await?);
        if !read_crlf_line(reader).await?.is_empty() {
            return Err(HttpError::BadChunk("missing chunk terminator".into()));
        }
    }
}

/// Read one HTTP/1.1 request from `reader`.
///
/// Returns `None` on a clean EOF at a message boundary, which is how the
/// peer signals it is done with the connection.
pub async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Request>, HttpError> {
    let head = match read_head(reader).await? {
        Some(head) => head,
        None => return Ok(None),
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    match parsed.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(HttpError::Parse("truncated request head".into()))
        }
        Err(e) => return Err(HttpError::Parse(e.to_string())),
    }

    let method = parsed.method.unwrap_or("").to_string();
    let target = parsed.path.unwrap_or("/").to_string();
    let version = parsed.version.unwrap_or(1);
    let header_vec: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    trace!(%method, %target, "parsed request head");

    let body = match body_framing(&header_vec, false, 0)? {
        BodyFraming::None | BodyFraming::Close => Vec::new(),
        BodyFraming::Length(n) => read_exact_body(reader, n).await?,
        BodyFraming::Chunked => read_chunked_body(reader).await?,
    };

    Ok(Some(Request {
        method,
        target,
        version,
        headers: header_vec,
        body,
    }))
}

/// Read one HTTP/1.1 response from `reader`.
///
/// A response is only ever read after a request was written, so EOF here is
/// always an error.
pub async fn read_response<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Response, HttpError> {
    let head = match read_head(reader).await? {
        Some(head) => head,
        None => return Err(HttpError::UnexpectedEof),
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(HttpError::Parse("truncated response head".into()))
        }
        Err(e) => return Err(HttpError::Parse(e.to_string())),
    }

    let status = parsed.code.unwrap_or(0);
    let reason = parsed.reason.unwrap_or("").to_string();
    let version = parsed.version.unwrap_or(1);
    let header_vec: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    trace!(status, "parsed response head");

    let mut close_delimited = false;
    let body = match body_framing(&header_vec, true, status)? {
        BodyFraming::None => Vec::new(),
        BodyFraming::Length(n) => read_exact_body(reader, n).await?,
        BodyFraming::Chunked => read_chunked_body(reader).await?,
        BodyFraming::Close => {
            close_delimited = true;
            let mut body = Vec::new();
            reader.read_to_end(&mut body).await?;
            body
        }
    };

    Ok(Response {
        status,
        reason,
        version,
        headers: header_vec,
        body,
        close_delimited,
    })
}

fn is_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("transfer-encoding")
}

/// Write a request in canonical HTTP/1.1 client form.
///
/// Headers pass through verbatim except the framing pair, which is replaced
/// by a Content-Length matching the decoded body.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    req: &Request,
) -> Result<(), HttpError> {
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(req.method.as_bytes());
    head.push(b' ');
    head.extend_from_slice(req.target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    let mut had_framing = false;
    for (name, value) in &req.headers {
        if is_framing_header(name) {
            had_framing = true;
            continue;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if had_framing || !req.body.is_empty() {
        head.extend_from_slice(format!("Content-Length: {}\r\n", req.body.len()).as_bytes());
    }
    head.extend_from_slice(b"\r\n");

    writer.write_all(&head).await?;
    if !req.body.is_empty() {
        writer.write_all(&req.body).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Write a response in canonical HTTP/1.1 form.
///
/// Bodiless statuses (1xx, 204, 304) get their head only; everything else
/// gets a Content-Length matching the decoded body.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    resp: &Response,
) -> Result<(), HttpError> {
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", resp.status, resp.reason).as_bytes());

    for (name, value) in &resp.headers {
        if is_framing_header(name) {
            continue;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    let bodiless = no_body_status(resp.status);
    if !bodiless {
        head.extend_from_slice(format!("Content-Length: {}\r\n", resp.body.len()).as_bytes());
    }
    head.extend_from_slice(b"\r\n");

    writer.write_all(&head).await?;
    if !bodiless && !resp.body.is_empty() {
        writer.write_all(&resp.body).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse_request(bytes: &[u8]) -> Request {
        let mut reader = bytes;
        read_request(&mut reader).await.unwrap().unwrap()
    }

    async fn parse_response(bytes: &[u8]) -> Response {
        let mut reader = bytes;
        read_response(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_simple_request() {
        let req = parse_request(b"GET /path?q=1 HTTP/1.1\r\nHost: example.com\r\n\r\n").await;
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/path?q=1");
        assert_eq!(req.header("host"), Some("example.com"));
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn test_read_request_with_body() {
        let req =
            parse_request(b"POST /api HTTP/1.1\r\nContent-Length: 13\r\n\r\n{\"key\":\"val\"}")
                .await;
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, b"{\"key\":\"val\"}");
    }

    #[tokio::test]
    async fn test_read_request_eof() {
        let mut reader: &[u8] = b"";
        assert!(read_request(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_truncated_body() {
        let mut reader: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(
            read_request(&mut reader).await,
            Err(HttpError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_read_response_content_length() {
        let resp = parse_response(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
        assert!(!resp.close_delimited);
    }

    #[tokio::test]
    async fn test_read_response_no_body_statuses() {
        for head in [
            &b"HTTP/1.1 204 No Content\r\n\r\n"[..],
            &b"HTTP/1.1 304 Not Modified\r\n\r\n"[..],
            &b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n"[..],
        ] {
            let resp = parse_response(head).await;
            assert!(resp.body.is_empty(), "status {}", resp.status);
        }
    }

    #[tokio::test]
    async fn test_read_response_chunked() {
        let resp = parse_response(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await;
        assert_eq!(resp.body, b"hello world");
    }

    #[tokio::test]
    async fn test_read_response_chunked_with_extension_and_trailer() {
        let resp = parse_response(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n0\r\nX-Trailer: t\r\n\r\n",
        )
        .await;
        assert_eq!(resp.body, b"hello");
    }

    #[tokio::test]
    async fn test_read_response_close_delimited() {
        let resp = parse_response(b"HTTP/1.1 200 OK\r\n\r\nstream until close").await;
        assert!(resp.close_delimited);
        assert_eq!(resp.body, b"stream until close");
    }

    #[tokio::test]
    async fn test_write_request_replaces_framing() {
        let req = Request {
            method: "POST".into(),
            target: "/x".into(),
            version: 1,
            headers: vec![
                ("Host".into(), "a".into()),
                ("Transfer-Encoding".into(), "chunked".into()),
            ],
            body: b"abcd".to_vec(),
        };
        let mut out = Vec::new();
        write_request(&mut out, &req).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("POST /x HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(!text.to_lowercase().contains("transfer-encoding"));
        assert!(text.ends_with("\r\n\r\nabcd"));
    }

    #[tokio::test]
    async fn test_write_request_no_body_no_length() {
        let req = Request {
            method: "GET".into(),
            target: "/".into(),
            version: 1,
            headers: vec![("Host".into(), "a".into())],
            body: Vec::new(),
        };
        let mut out = Vec::new();
        write_request(&mut out, &req).await.unwrap();
        assert!(!String::from_utf8(out).unwrap().contains("Content-Length"));
    }

    #[tokio::test]
    async fn test_write_response_101_head_only() {
        let resp = Response::new(101, "Switching Protocols")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade");
        let mut out = Vec::new();
        write_response(&mut out, &resp).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_multi_valued_headers_preserved_in_order() {
        let resp = parse_response(
            b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        let cookies: Vec<&str> = resp
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn test_successive_messages_share_reader() {
        // Two responses back to back through one reader; the second must
        // not lose bytes buffered while the first was being read.
        let mut reader: &[u8] =
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\noneHTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo";
        let first = read_response(&mut reader).await.unwrap();
        let second = read_response(&mut reader).await.unwrap();
        assert_eq!(first.body, b"one");
        assert_eq!(second.body, b"two");
    }

    #[tokio::test]
    async fn test_pipelined_request_leaves_residue() {
        let mut reader: &[u8] =
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n";
        let first = read_request(&mut reader).await.unwrap().unwrap();
        let second = read_request(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.target, "/a");
        assert_eq!(second.target, "/b");
    }

    #[test]
    fn test_websocket_upgrade_detection() {
        let req = Request {
            method: "GET".into(),
            target: "/ws".into(),
            version: 1,
            headers: vec![
                ("Connection".into(), "Upgrade".into()),
                ("Upgrade".into(), "websocket".into()),
            ],
            body: Vec::new(),
        };
        assert!(req.is_websocket_upgrade());
    }

    #[test]
    fn test_wants_close() {
        let mut req = Request {
            method: "GET".into(),
            target: "/".into(),
            version: 1,
            headers: vec![],
            body: Vec::new(),
        };
        assert!(!req.wants_close());
        req.headers.push(("Connection".into(), "close".into()));
        assert!(req.wants_close());
        req.headers.clear();
        req.version = 0;
        assert!(req.wants_close());
    }
}
