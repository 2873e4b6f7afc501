pub mod auth;
pub mod demux;
pub mod filters;
pub mod h1;
pub mod h2;
pub mod routes;

pub use demux::{classify, DemuxResult};
pub use h1::Http1Engine;
