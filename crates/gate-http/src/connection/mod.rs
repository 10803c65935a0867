//! Connection lifecycle: the per-socket request loop.

mod http_connection;

pub use http_connection::HttpConnection;
