//! Plugin/Filter host (C16, spec §9 "Dynamic dispatch"): a fixed-order list
//! of objects with a two-method capability set, each returning
//! continue/stop/error. The production WASM host is out of scope (spec
//! §1/§9b); this module ships the trait plus one real, non-WASM filter
//! (request-id stamping) so the call sites in the H1/H2 engines are
//! actually exercised.

use crate::h1::parser::RequestView;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("filter rejected request: {0}")]
    Rejected(String),
}

pub enum FilterOutcome<R> {
    Continue,
    Stop(R),
    Error(FilterError),
}

/// A minimal, owned snapshot of request metadata a filter is allowed to
/// inspect/mutate without holding the zero-copy [`RequestView`] alive past
/// the filter call (filters may run after the owning buffer is reused).
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, Vec<u8>)>,
    pub request_id: Option<String>,
}

impl RequestMeta {
    pub fn from_view(view: &RequestView<'_>) -> Self {
        Self {
            method: view.method.to_string(),
            path: view.path.to_string(),
            headers: view
                .headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_vec()))
                .collect(),
            request_id: None,
        }
    }
}

pub struct ResponseMeta {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Two-method capability set per request filter (spec §9).
pub trait RequestFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn on_request(&self, req: &mut RequestMeta) -> FilterOutcome<ResponseMeta>;
    fn on_response(&self, resp: &mut ResponseMeta) -> FilterOutcome<()>;
}

/// Runs every filter in order, short-circuiting on `Stop`/`Error`.
pub fn run_on_request(
    filters: &[Box<dyn RequestFilter>],
    req: &mut RequestMeta,
) -> FilterOutcome<ResponseMeta> {
    for f in filters {
        match f.on_request(req) {
            FilterOutcome::Continue => continue,
            other => return other,
        }
    }
    FilterOutcome::Continue
}

pub fn run_on_response(filters: &[Box<dyn RequestFilter>], resp: &mut ResponseMeta) -> FilterOutcome<()> {
    for f in filters {
        match f.on_response(resp) {
            FilterOutcome::Continue => continue,
            other => return other,
        }
    }
    FilterOutcome::Continue
}

/// Built-in, non-WASM filter: stamps an `X-Request-Id` onto every request
/// that doesn't already carry one, and mirrors it back on the response.
pub struct RequestIdFilter {
    counter: std::sync::atomic::AtomicU64,
}

impl Default for RequestIdFilter {
    fn default() -> Self {
        Self {
            counter: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl RequestFilter for RequestIdFilter {
    fn name(&self) -> &'static str {
        "request-id"
    }

    fn on_request(&self, req: &mut RequestMeta) -> FilterOutcome<ResponseMeta> {
        if req.request_id.is_none() {
            let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            req.request_id = Some(format!("blitz-{n:016x}"));
        }
        FilterOutcome::Continue
    }

    fn on_response(&self, resp: &mut ResponseMeta) -> FilterOutcome<()> {
        resp.headers
            .push(("X-Filter".to_string(), self.name().to_string()));
        FilterOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_filter_stamps_and_is_stable_across_calls() {
        let f = RequestIdFilter::default();
        let mut req = RequestMeta {
            method: "GET".into(),
            path: "/".into(),
            headers: vec![],
            request_id: None,
        };
        assert!(matches!(f.on_request(&mut req), FilterOutcome::Continue));
        assert!(req.request_id.is_some());
    }

    #[test]
    fn chain_short_circuits_on_stop() {
        struct Blocker;
        impl RequestFilter for Blocker {
            fn name(&self) -> &'static str {
                "blocker"
            }
            fn on_request(&self, _req: &mut RequestMeta) -> FilterOutcome<ResponseMeta> {
                FilterOutcome::Stop(ResponseMeta {
                    status: 403,
                    headers: vec![],
                })
            }
            fn on_response(&self, _resp: &mut ResponseMeta) -> FilterOutcome<()> {
                FilterOutcome::Continue
            }
        }
        let filters: Vec<Box<dyn RequestFilter>> =
            vec![Box::new(Blocker), Box::new(RequestIdFilter::default())];
        let mut req = RequestMeta {
            method: "GET".into(),
            path: "/".into(),
            headers: vec![],
            request_id: None,
        };
        match run_on_request(&filters, &mut req) {
            FilterOutcome::Stop(resp) => assert_eq!(resp.status, 403),
            _ => panic!("expected Stop"),
        }
        assert!(req.request_id.is_none(), "second filter must not have run");
    }
}
