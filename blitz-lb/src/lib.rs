pub mod backend;
pub mod forward;
pub mod health;
pub mod pool;
pub mod selector;

pub use backend::Backend;
pub use forward::{forward, ForwardError, RetryPolicy, Transport, TransportError};
pub use pool::UpstreamPool;
pub use selector::Selector;
