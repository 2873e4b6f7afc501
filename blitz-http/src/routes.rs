//! Built-in origin-mode routing (spec §4.6): a small fixed set — `/hello`,
//! `/`, `/health`, `/echo/*`, and JWT-protected `/api/*`. Load-balancer mode
//! bypasses this entirely in favor of `blitz-lb` forwarding.

use crate::auth::{AuthError, Authenticator};
use crate::h1::parser::RequestView;
use crate::h1::response::ResponseBuilder;
use crate::h2::hpack::HeaderList;

pub fn route_origin(view: &RequestView<'_>, authenticator: Option<&dyn Authenticator>) -> Vec<u8> {
    let keep_alive = view.keep_alive();
    match view.path {
        "/hello" => ResponseBuilder::new(200, "OK")
            .header("Content-Type", "text/plain")
            .body("Hello, World!\n")
            .keep_alive(keep_alive)
            .encode(),
        "/" => ResponseBuilder::new(200, "OK")
            .header("Content-Type", "text/plain")
            .body("blitz-gateway\n")
            .keep_alive(keep_alive)
            .encode(),
        "/health" => ResponseBuilder::new(200, "OK")
            .header("Content-Type", "application/json")
            .body(r#"{"status":"ok"}"#)
            .keep_alive(keep_alive)
            .encode(),
        path if path.starts_with("/echo/") => {
            let echoed = &path["/echo/".len()..];
            ResponseBuilder::new(200, "OK")
                .header("Content-Type", "text/plain")
                .body(echoed.as_bytes().to_vec())
                .keep_alive(keep_alive)
                .encode()
        }
        path if path.starts_with("/api/") => route_api(view, authenticator, keep_alive),
        _ => ResponseBuilder::new(404, "Not Found")
            .keep_alive(keep_alive)
            .encode(),
    }
}

/// Same fixed route set as [`route_origin`], operating on an HTTP/2 header
/// list (`:method`/`:path` pseudo-headers) and returning a response header
/// list plus body rather than a serialized HTTP/1.1 byte stream, since the
/// HTTP/2 engine owns framing (spec §4.7).
pub fn route_origin_h2(
    headers: &HeaderList,
    _body: &[u8],
    authenticator: Option<&dyn Authenticator>,
) -> (HeaderList, Vec<u8>) {
    let path = headers
        .iter()
        .find(|(n, _)| n == ":path")
        .map(|(_, v)| v.as_str())
        .unwrap_or("/");

    let status_headers = |status: u16, content_type: &str| {
        vec![
            (":status".to_string(), status.to_string()),
            ("content-type".to_string(), content_type.to_string()),
        ]
    };

    match path {
        "/hello" => (status_headers(200, "text/plain"), b"Hello, World!\n".to_vec()),
        "/" => (status_headers(200, "text/plain"), b"blitz-gateway\n".to_vec()),
        "/health" => (
            status_headers(200, "application/json"),
            br#"{"status":"ok"}"#.to_vec(),
        ),
        p if p.starts_with("/echo/") => {
            let echoed = p["/echo/".len()..].as_bytes().to_vec();
            (status_headers(200, "text/plain"), echoed)
        }
        p if p.starts_with("/api/") => route_api_h2(headers, authenticator),
        _ => (vec![(":status".to_string(), "404".to_string())], Vec::new()),
    }
}

fn route_api_h2(headers: &HeaderList, authenticator: Option<&dyn Authenticator>) -> (HeaderList, Vec<u8>) {
    let Some(authenticator) = authenticator else {
        return (vec![(":status".to_string(), "500".to_string())], Vec::new());
    };
    let Some((_, auth_value)) = headers.iter().find(|(n, _)| n == "authorization") else {
        return (
            vec![
                (":status".to_string(), "401".to_string()),
                ("www-authenticate".to_string(), "Bearer".to_string()),
            ],
            Vec::new(),
        );
    };
    let bearer = match crate::auth::JwtAuthenticator::extract_bearer(auth_value.as_bytes()) {
        Ok(b) => b,
        Err(_) => return (vec![(":status".to_string(), "401".to_string())], Vec::new()),
    };
    match authenticator.authenticate(bearer) {
        Ok(claims) => (
            status_headers_h2(200, "application/json"),
            format!(r#"{{"sub":{:?}}}"#, claims.sub.unwrap_or_default()).into_bytes(),
        ),
        Err(AuthError::Expired) => (vec![(":status".to_string(), "401".to_string())], b"token expired".to_vec()),
        Err(_) => (vec![(":status".to_string(), "403".to_string())], Vec::new()),
    }
}

fn status_headers_h2(status: u16, content_type: &str) -> HeaderList {
    vec![
        (":status".to_string(), status.to_string()),
        ("content-type".to_string(), content_type.to_string()),
    ]
}

fn route_api(view: &RequestView<'_>, authenticator: Option<&dyn Authenticator>, keep_alive: bool) -> Vec<u8> {
    let Some(authenticator) = authenticator else {
        return ResponseBuilder::new(500, "Internal Server Error")
            .keep_alive(keep_alive)
            .encode();
    };
    let auth_header = match view.header("authorization") {
        Some(h) => h,
        None => {
            return ResponseBuilder::new(401, "Unauthorized")
                .header("WWW-Authenticate", "Bearer")
                .keep_alive(keep_alive)
                .encode()
        }
    };
    let bearer = match crate::auth::JwtAuthenticator::extract_bearer(auth_header) {
        Ok(b) => b,
        Err(_) => {
            return ResponseBuilder::new(401, "Unauthorized")
                .keep_alive(keep_alive)
                .encode()
        }
    };
    match authenticator.authenticate(bearer) {
        Ok(claims) => ResponseBuilder::new(200, "OK")
            .header("Content-Type", "application/json")
            .body(format!(r#"{{"sub":{:?}}}"#, claims.sub.unwrap_or_default()))
            .keep_alive(keep_alive)
            .encode(),
        Err(AuthError::Expired) => ResponseBuilder::new(401, "Unauthorized")
            .body("token expired")
            .keep_alive(keep_alive)
            .encode(),
        Err(_) => ResponseBuilder::new(403, "Forbidden")
            .keep_alive(keep_alive)
            .encode(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h1::parser::parse_request;

    #[test]
    fn hello_world_literal_scenario() {
        let raw = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        let view = parse_request(raw).unwrap().unwrap();
        let resp = route_origin(&view, None);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 14\r\n"));
        assert!(text.ends_with("\r\n\r\nHello, World!\n"));
    }

    #[test]
    fn echo_returns_suffix() {
        let raw = b"GET /echo/hi-there HTTP/1.1\r\nHost: x\r\n\r\n";
        let view = parse_request(raw).unwrap().unwrap();
        let resp = route_origin(&view, None);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.ends_with("hi-there"));
    }

    #[test]
    fn api_without_authorization_is_unauthorized() {
        struct AlwaysOk;
        impl Authenticator for AlwaysOk {
            fn authenticate(&self, _b: &str) -> Result<crate::auth::Claims, AuthError> {
                unreachable!()
            }
        }
        let raw = b"GET /api/whoami HTTP/1.1\r\nHost: x\r\n\r\n";
        let view = parse_request(raw).unwrap().unwrap();
        let resp = route_origin(&view, Some(&AlwaysOk));
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 401"));
    }

    #[test]
    fn unknown_path_is_404() {
        let raw = b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n";
        let view = parse_request(raw).unwrap().unwrap();
        let resp = route_origin(&view, None);
        assert!(String::from_utf8(resp).unwrap().starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn h2_hello_matches_h1_body() {
        let headers = vec![
            (":method".to_string(), "GET".to_string()),
            (":path".to_string(), "/hello".to_string()),
        ];
        let (resp_headers, body) = route_origin_h2(&headers, &[], None);
        assert_eq!(resp_headers[0], (":status".to_string(), "200".to_string()));
        assert_eq!(body, b"Hello, World!\n");
    }

    #[test]
    fn h2_api_without_authorization_is_unauthorized() {
        struct AlwaysOk;
        impl Authenticator for AlwaysOk {
            fn authenticate(&self, _b: &str) -> Result<crate::auth::Claims, AuthError> {
                unreachable!()
            }
        }
        let headers = vec![
            (":method".to_string(), "GET".to_string()),
            (":path".to_string(), "/api/whoami".to_string()),
        ];
        let (resp_headers, _) = route_origin_h2(&headers, &[], Some(&AlwaysOk));
        assert_eq!(resp_headers[0], (":status".to_string(), "401".to_string()));
    }
}
