//! The business seams of the front end: the payload handler and the
//! request validation hook.
//!
//! Every request that survives decoding reaches exactly one [`Handler`],
//! which turns the decoded payload into the response body string. The
//! defaults ([`AckHandler`], [`NoopValidate`]) accept everything.

use std::error::Error;

use async_trait::async_trait;
use http::StatusCode;

use crate::protocol::RequestContext;

/// The decoded request payload: always a structured mapping.
///
/// POST bodies arrive as parsed JSON objects; other methods' bodies as
/// url-encoded form fields lifted into string values.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Produces the response body for a decoded request.
///
/// An `Err` is logged in full on the server side; the client only ever
/// sees a generic 500.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: RequestContext, payload: Payload) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Adapts an async function or closure into a [`Handler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, Err> Handler for HandlerFn<F>
where
    F: Fn(RequestContext, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, Err>> + Send,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    async fn call(&self, ctx: RequestContext, payload: Payload) -> Result<String, Box<dyn Error + Send + Sync>> {
        (self.f)(ctx, payload).await.map_err(Into::into)
    }
}

pub fn make_handler<F, Fut, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(RequestContext, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, Err>> + Send,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    HandlerFn { f }
}

/// Default handler: acknowledges every payload with `OK`.
#[derive(Debug, Default)]
pub struct AckHandler;

#[async_trait]
impl Handler for AckHandler {
    async fn call(&self, _ctx: RequestContext, _payload: Payload) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok("OK".to_string())
    }
}

/// A validation failure, carrying the status and message the client gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: StatusCode,
    pub description: String,
}

impl Rejection {
    pub fn new(code: StatusCode, description: impl Into<String>) -> Self {
        Self { code, description: description.into() }
    }
}

/// Pre-dispatch request validation hook.
///
/// Runs after the payload decoded cleanly and before the handler; a
/// rejection short-circuits dispatch and is mapped straight onto the
/// response.
pub trait Validate: Send + Sync {
    fn validate(&self, ctx: &RequestContext) -> Result<(), Rejection>;
}

/// Default validation hook: accepts every request.
#[derive(Debug, Default)]
pub struct NoopValidate;

impl Validate for NoopValidate {
    fn validate(&self, _ctx: &RequestContext) -> Result<(), Rejection> {
        Ok(())
    }
}
