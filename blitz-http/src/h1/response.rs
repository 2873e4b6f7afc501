//! HTTP/1.1 response composition (C6, spec §4.6): built into a write buffer
//! in one shot, no incremental streaming for the built-in routes.

use httpdate::fmt_http_date;
use std::time::SystemTime;

pub struct ResponseBuilder {
    status: u16,
    reason: &'static str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    keep_alive: bool,
}

impl ResponseBuilder {
    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn encode(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes());
        out.extend_from_slice(format!("Date: {}\r\n", fmt_http_date(SystemTime::now())).as_bytes());
        out.extend_from_slice(b"Server: blitz-gateway\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if self.headers.iter().all(|(n, _)| !n.eq_ignore_ascii_case("content-length")) {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "Connection: {}\r\n",
                if self.keep_alive { "keep-alive" } else { "close" }
            )
            .as_bytes(),
        );
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

pub fn simple_status(status: u16, reason: &'static str, keep_alive: bool) -> Vec<u8> {
    ResponseBuilder::new(status, reason).keep_alive(keep_alive).encode()
}

pub fn switching_protocols_h2c() -> Vec<u8> {
    b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: h2c\r\n\r\n".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_hello_world_exactly() {
        let resp = ResponseBuilder::new(200, "OK")
            .header("Content-Type", "text/plain")
            .body("Hello, World!\n")
            .encode();
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 14\r\n"));
        assert!(text.ends_with("\r\n\r\nHello, World!\n"));
    }

    #[test]
    fn close_connection_when_not_keep_alive() {
        let resp = ResponseBuilder::new(400, "Bad Request")
            .keep_alive(false)
            .encode();
        let text = String::from_utf8(resp).unwrap();
        assert!(text.contains("Connection: close\r\n"));
    }
}
