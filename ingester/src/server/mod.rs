//! HTTP transport for the ingester.

mod handlers;
mod http;
mod middleware;

pub use http::{IngesterServer, ServerConfig};
