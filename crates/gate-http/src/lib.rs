//! An admission-controlled HTTP front end
//!
//! This crate puts a connection-managed gate in front of a single business
//! handler. It is not a web framework: there is no routing, no TLS, no
//! HTTP/2. It is an HTTP/1.1 listener that tracks every live connection,
//! sheds load at accept time, evicts stale connections on a fixed cadence,
//! buffers and size-limits request bodies, decodes them into a structured
//! payload, and guarantees each request exactly one terminal outcome.
//!
//! # Features
//!
//! - Admission control: a hard ceiling on live connections, enforced
//!   before any request event is processed
//! - Connection registry with recycled slot indices and a 1 s ttl sweep
//! - Request bodies buffered under a configurable size limit; violations
//!   destroy the connection without a response frame
//! - POST bodies decoded as JSON, all other methods as url-encoded form;
//!   only structured mappings reach the handler
//! - Pluggable handler and validation hook, with keep-alive connections
//! - Idempotent response close: a late handler result on an evicted
//!   connection is a silent no-op
//!
//! # Example
//!
//! ```no_run
//! use std::io;
//! use gate_http::handler::{make_handler, Payload};
//! use gate_http::protocol::RequestContext;
//! use gate_http::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let handler = make_handler(|ctx: RequestContext, payload: Payload| async move {
//!         Ok::<_, io::Error>(format!("hello {}, {} fields", ctx.client_ip().unwrap_or("?"), payload.len()))
//!     });
//!
//!     let handle = Server::builder()
//!         .address("127.0.0.1:8080")
//!         .handler(handler)
//!         .build()
//!         .expect("address is set")
//!         .listen()
//!         .await
//!         .expect("bind failed");
//!
//!     tokio::signal::ctrl_c().await.expect("ctrl-c");
//!     handle.shutdown();
//! }
//! ```
//!
//! # Architecture
//!
//! - [`registry`]: connection tracking, admission, slot allocation, sweep
//! - [`pipeline`]: per-request body accumulation, decoding and dispatch
//! - [`connection`]: the per-socket request loop over framed codecs
//! - [`codec`]: HTTP/1.1 request decoding and response encoding
//! - [`handler`]: the handler and validation seams
//! - [`server`]: listener glue, configuration, shutdown
//! - [`protocol`]: shared vocabulary and error taxonomy
//!
//! # Degrade-under-load behavior
//!
//! Clients receive either one complete response or an abrupt close with no
//! response bytes. The abrupt close is deliberate: it is what admission
//! rejection, slot exhaustion, size-limit violations and ttl eviction look
//! like from the outside.

pub mod codec;
pub mod connection;
pub mod handler;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod server;

mod utils;
pub(crate) use utils::ensure;
