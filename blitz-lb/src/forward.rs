//! Request forwarding with bounded retry (spec §4.10, §6 "Upstream
//! failures trigger retry on a different backend within the retry budget").

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::backend::Backend;
use crate::selector::Selector;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no backend available")]
    NoBackend,
    #[error("all {attempts} attempt(s) against upstream failed")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(50),
        }
    }
}

/// What the caller does to actually talk to a chosen backend; kept generic
/// so this module stays free of I/O and is trivially testable. Returns
/// `Ok(response_bytes)` or an error tagged with whether any response bytes
/// had already reached the client (which forecloses retrying).
pub trait Transport {
    fn send(&mut self, backend: &Backend) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    ConnectFailed,
    ReadFailed,
    /// Partial response already reached the client; must not retry (spec
    /// §4.10: "Failures after response bytes have begun to reach the
    /// client are not retried.").
    PartialResponseSent,
}

pub fn forward<T: Transport>(
    selector: &Selector,
    transport: &mut T,
    policy: &RetryPolicy,
    sleep: impl Fn(Duration),
) -> Result<Vec<u8>, ForwardError> {
    let mut tried = Vec::new();
    let mut attempts = 0u32;

    loop {
        let Some(backend) = selector.select_excluding(&tried) else {
            return Err(ForwardError::NoBackend);
        };
        attempts += 1;
        tried.push(backend.name.clone());

        match transport.send(&backend) {
            Ok(response) => {
                backend.record_success();
                return Ok(response);
            }
            Err(TransportError::PartialResponseSent) => {
                backend.record_failure();
                return Err(ForwardError::Exhausted { attempts });
            }
            Err(e) => {
                backend.record_failure();
                warn!(backend = %backend.name, ?e, attempts, "upstream attempt failed");
                if attempts > policy.max_retries {
                    return Err(ForwardError::Exhausted { attempts });
                }
                sleep(policy.backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn backend(name: &str) -> Arc<Backend> {
        Arc::new(Backend::new(name.into(), "h".into(), 1, 1, None))
    }

    struct ScriptedTransport {
        results: RefCell<Vec<Result<Vec<u8>, TransportError>>>,
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, _backend: &Backend) -> Result<Vec<u8>, TransportError> {
            self.results.borrow_mut().remove(0)
        }
    }

    #[test]
    fn retries_on_different_backend_and_leaves_first_backends_counter_at_failure() {
        let b1 = backend("b1");
        let b2 = backend("b2");
        let selector = Selector::new(vec![b1.clone(), b2.clone()]);
        let mut transport = ScriptedTransport {
            results: RefCell::new(vec![Err(TransportError::ConnectFailed), Ok(b"ok".to_vec())]),
        };
        let result = forward(&selector, &mut transport, &RetryPolicy::default(), |_| {});
        assert_eq!(result.unwrap(), b"ok");
        let total_failures = b1.counters().1 + b2.counters().1;
        let total_successes = b1.counters().0 + b2.counters().0;
        assert_eq!(total_failures, 1);
        assert_eq!(total_successes, 1);
    }

    #[test]
    fn partial_response_is_never_retried() {
        let b1 = backend("b1");
        let selector = Selector::new(vec![b1.clone()]);
        let mut transport = ScriptedTransport {
            results: RefCell::new(vec![Err(TransportError::PartialResponseSent)]),
        };
        let result = forward(&selector, &mut transport, &RetryPolicy::default(), |_| {});
        assert!(matches!(result, Err(ForwardError::Exhausted { attempts: 1 })));
    }

    #[test]
    fn exhausts_retry_budget_and_surfaces_error() {
        let b1 = backend("b1");
        let selector = Selector::new(vec![b1.clone()]);
        let policy = RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(0),
        };
        let mut transport = ScriptedTransport {
            results: RefCell::new(vec![
                Err(TransportError::ConnectFailed),
                Err(TransportError::ConnectFailed),
            ]),
        };
        let result = forward(&selector, &mut transport, &policy, |_| {});
        assert!(matches!(result, Err(ForwardError::Exhausted { attempts: 2 })));
    }

    #[test]
    fn no_backends_is_reported_distinctly() {
        let selector = Selector::new(vec![]);
        let mut transport = ScriptedTransport {
            results: RefCell::new(vec![]),
        };
        let result = forward(&selector, &mut transport, &RetryPolicy::default(), |_| {});
        assert!(matches!(result, Err(ForwardError::NoBackend)));
    }
}
