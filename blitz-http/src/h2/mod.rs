pub mod conn;
pub mod flow;
pub mod frame;
pub mod hpack;
pub mod settings;
pub mod stream;

pub use conn::{CompletedRequest, Connection};
