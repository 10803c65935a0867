//! The per-request pipeline: accumulate, decode, validate, dispatch.
//!
//! States run strictly forward, accumulation then decoding then dispatch,
//! and the connection turns the outcome into exactly one terminal event:
//! a single response write, or a teardown with no response frame. The
//! handler await inside [`RequestPipeline::run`] is the pipeline's only
//! suspension point.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{Method, StatusCode};
use std::error::Error;
use std::io;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::trace;

use crate::codec::RequestDecoder;
use crate::handler::{Handler, Payload, Rejection, Validate};
use crate::protocol::{Message, ParseError, PayloadItem, RequestContext};

mod decode;

/// Everything that can end a request without a 200.
///
/// [`PipelineError::is_teardown`] splits the taxonomy in two: teardown
/// errors destroy the connection with no response frame, the rest map onto
/// a status and client message via [`PipelineError::status`] and
/// [`PipelineError::client_message`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Body exceeded the configured size limit mid-accumulation
    #[error("request body exceeds the content size limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Body framing broke down or the transport failed mid-body
    #[error("transport error while reading body: {0}")]
    Transport(#[from] ParseError),

    /// Body bytes would not parse at all
    #[error("can't decode request body: {reason}")]
    DecodeFailed { reason: String },

    /// Body parsed, but to something other than a structured mapping
    #[error("invalid payload type: {kind}")]
    InvalidPayloadType { kind: &'static str },

    /// The validation hook refused the request
    #[error("request rejected: {description}")]
    ValidationFailed { code: StatusCode, description: String },

    /// The handler returned an error
    #[error("handler failed: {source}")]
    HandlerFailed { source: Box<dyn Error + Send + Sync> },
}

impl PipelineError {
    pub fn decode_failed<E: ToString>(e: E) -> Self {
        Self::DecodeFailed { reason: e.to_string() }
    }

    pub fn handler_failed<E: Into<Box<dyn Error + Send + Sync>>>(e: E) -> Self {
        Self::HandlerFailed { source: e.into() }
    }

    /// True when the request must end in a connection teardown instead of
    /// an error response.
    pub fn is_teardown(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. } | Self::Transport(_))
    }

    /// The response status for non-teardown failures.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPayloadType { .. } => StatusCode::BAD_REQUEST,
            Self::ValidationFailed { code, .. } => *code,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The response body for non-teardown failures. Generic unless the
    /// error deliberately carries diagnostic text for the client.
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidPayloadType { .. } => "Bad Request: Invalid payload type".to_string(),
            Self::ValidationFailed { description, .. } => description.clone(),
            _ => "Server error".to_string(),
        }
    }
}

impl From<Rejection> for PipelineError {
    fn from(rejection: Rejection) -> Self {
        Self::ValidationFailed { code: rejection.code, description: rejection.description }
    }
}

/// Drives one request from body accumulation to the handler's reply.
pub struct RequestPipeline<'a, R> {
    framed_read: &'a mut FramedRead<R, RequestDecoder>,
    content_size_limit: usize,
}

impl<'a, R> RequestPipeline<'a, R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(framed_read: &'a mut FramedRead<R, RequestDecoder>, content_size_limit: usize) -> Self {
        Self { framed_read, content_size_limit }
    }

    /// Runs the pipeline to its reply, or to the error that decides the
    /// terminal outcome.
    pub async fn run<H, V>(&mut self, ctx: &RequestContext, handler: &H, validator: &V) -> Result<String, PipelineError>
    where
        H: Handler + ?Sized,
        V: Validate + ?Sized,
    {
        let body = self.accumulate(ctx.method()).await?;
        let payload = decode::decode_payload(ctx.method(), &body)?;
        drop(body);

        validator.validate(ctx)?;

        handler.call(ctx.clone(), payload).await.map_err(PipelineError::handler_failed)
    }

    /// Accumulates the request body, in transport order, under the size
    /// limit. On violation the buffer is discarded and the caller tears the
    /// connection down; the handler never runs.
    async fn accumulate(&mut self, method: &Method) -> Result<Bytes, PipelineError> {
        let mut body = BytesMut::new();

        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Payload(PayloadItem::Chunk(chunk)))) => {
                    if body.len() + chunk.len() > self.content_size_limit {
                        trace!(method = %method, received = body.len() + chunk.len(), limit = self.content_size_limit, "body over limit");
                        return Err(PipelineError::PayloadTooLarge { limit: self.content_size_limit });
                    }
                    body.extend_from_slice(&chunk);
                }

                Some(Ok(Message::Payload(PayloadItem::Eof))) => {
                    trace!(method = %method, body_size = body.len(), "body accumulated");
                    return Ok(body.freeze());
                }

                Some(Ok(Message::Header(_))) => {
                    return Err(ParseError::invalid_header("request head while reading body").into());
                }

                Some(Err(e)) => return Err(e.into()),

                None => return Err(ParseError::io(io::Error::from(io::ErrorKind::UnexpectedEof)).into()),
            }
        }
    }
}
