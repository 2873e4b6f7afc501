//! HTTP/1.1 zero-copy request parsing (C6, spec §4.6): a parsed view over
//! the connection's read buffer, no owned substrings for header
//! name/value/path data.

use httparse::{Request as RawRequest, EMPTY_HEADER};

pub const MAX_HEADERS: usize = 64;
pub const MAX_HEADER_SECTION_BYTES: usize = 64 * 1024;
pub const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line or headers")]
    Malformed,
    #[error("header section exceeds {MAX_HEADER_SECTION_BYTES} bytes")]
    HeaderSectionTooLarge,
    #[error("request body exceeds {MAX_REQUEST_BYTES} bytes")]
    BodyTooLarge,
}

/// Borrowed view into the connection's read buffer. Every field is a slice
/// of `buf`; no copy is made until a handler explicitly needs an owned
/// value (e.g. to hand off to an upstream after the buffer is reused).
pub struct RequestView<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub version_minor: u8,
    pub headers: Vec<(&'a str, &'a [u8])>,
    pub body: &'a [u8],
    /// Byte offset in `buf` where the header section ended (start of body).
    pub head_len: usize,
}

impl<'a> RequestView<'a> {
    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case(b"close") => false,
            Some(v) if v.eq_ignore_ascii_case(b"keep-alive") => true,
            _ => self.version_minor >= 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn is_h2c_upgrade(&self) -> bool {
        let upgrades_to_h2c = self
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case(b"h2c"));
        upgrades_to_h2c && self.header("http2-settings").is_some()
    }
}

/// Parses one request from the front of `buf`. Returns `Ok(None)` if more
/// bytes are needed (partial read), `Ok(Some(view))` on a complete request,
/// `Err` on malformed input (caller replies `400` and closes, spec §4.6).
pub fn parse_request(buf: &[u8]) -> Result<Option<RequestView<'_>>, ParseError> {
    if buf.len() > MAX_HEADER_SECTION_BYTES
        && find_header_end(buf).is_none()
    {
        return Err(ParseError::HeaderSectionTooLarge);
    }

    let mut raw_headers = [EMPTY_HEADER; MAX_HEADERS];
    let mut req = RawRequest::new(&mut raw_headers);
    let status = req.parse(buf).map_err(|_| ParseError::Malformed)?;

    let head_len = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let method = req.method.ok_or(ParseError::Malformed)?;
    let path = req.path.ok_or(ParseError::Malformed)?;
    let version_minor = req.version.ok_or(ParseError::Malformed)?;

    let headers: Vec<(&str, &[u8])> = req
        .headers
        .iter()
        .map(|h| (h.name, h.value))
        .collect();

    let view = RequestView {
        method,
        path,
        version_minor,
        headers,
        body: &buf[head_len..],
        head_len,
    };

    if let Some(cl) = view.content_length() {
        if head_len + cl > MAX_REQUEST_BYTES {
            return Err(ParseError::BodyTooLarge);
        }
        if view.body.len() < cl {
            // Body not fully buffered yet; caller should keep reading.
            return Ok(None);
        }
    }

    Ok(Some(view))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Borrowed view over an upstream HTTP/1.1 response's status line and
/// headers (the load-balancer forwarding path, spec §4.10: "reads the
/// response, and relays it back"). Mirrors `RequestView`'s header/
/// keep-alive/content-length helpers.
pub struct ResponseHead<'a> {
    pub status: u16,
    pub version_minor: u8,
    pub headers: Vec<(&'a str, &'a [u8])>,
    /// Byte offset in `buf` where the header section ended (start of body).
    pub head_len: usize,
}

impl<'a> ResponseHead<'a> {
    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case(b"close") => false,
            Some(v) if v.eq_ignore_ascii_case(b"keep-alive") => true,
            _ => self.version_minor >= 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.trim().parse().ok())
    }
}

/// Parses a response status line + headers from the front of `buf`. Same
/// partial/malformed contract as `parse_request`; the caller decides how
/// many more body bytes to read using `content_length()`.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<ResponseHead<'_>>, ParseError> {
    let mut raw_headers = [EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut raw_headers);
    let status = resp.parse(buf).map_err(|_| ParseError::Malformed)?;

    let head_len = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let code = resp.code.ok_or(ParseError::Malformed)?;
    let version_minor = resp.version.ok_or(ParseError::Malformed)?;
    let headers: Vec<(&str, &[u8])> = resp.headers.iter().map(|h| (h.name, h.value)).collect();

    Ok(Some(ResponseHead {
        status: code,
        version_minor,
        headers,
        head_len,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let raw = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        let view = parse_request(raw).unwrap().unwrap();
        assert_eq!(view.method, "GET");
        assert_eq!(view.path, "/hello");
        assert!(view.keep_alive());
    }

    #[test]
    fn partial_request_requests_more_bytes() {
        let raw = b"GET /hello HTTP/1.1\r\nHost: x\r\n";
        assert!(parse_request(raw).unwrap().is_none());
    }

    #[test]
    fn detects_h2c_upgrade_request() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: h2c\r\nHTTP2-Settings: AAMAAABkAARAAAAAAAIAAAAA\r\nConnection: Upgrade, HTTP2-Settings\r\n\r\n";
        let view = parse_request(raw).unwrap().unwrap();
        assert!(view.is_h2c_upgrade());
    }

    #[test]
    fn malformed_request_line_is_rejected() {
        let raw = b"NOT A REQUEST\r\n\r\n";
        assert!(parse_request(raw).is_err());
    }

    #[test]
    fn connection_close_overrides_default_keep_alive() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
        let view = parse_request(raw).unwrap().unwrap();
        assert!(!view.keep_alive());
    }

    #[test]
    fn parses_response_status_and_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let head = parse_response_head(raw).unwrap().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.content_length(), Some(5));
        assert!(head.keep_alive());
    }

    #[test]
    fn partial_response_head_requests_more_bytes() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Len";
        assert!(parse_response_head(raw).unwrap().is_none());
    }

    #[test]
    fn response_connection_close_is_honored() {
        let raw = b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n";
        let head = parse_response_head(raw).unwrap().unwrap();
        assert_eq!(head.status, 502);
        assert!(!head.keep_alive());
    }
}
