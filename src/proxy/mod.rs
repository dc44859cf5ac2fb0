//! Proxy endpoint, upstream client and HTTP server

mod handler;
pub mod response;
mod router;
mod server;
pub mod upstream;

pub use handler::ProxyHandler;
pub use router::{AppState, create_router};
pub use server::ProxyServer;
pub use upstream::{UpstreamClient, UpstreamReply};
