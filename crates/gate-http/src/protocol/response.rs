//! The terminal write side of a request.
//!
//! Every request ends in exactly one of two ways: a single response written
//! through [`ResponseContext::close`], or a teardown via
//! [`ResponseContext::destroy`] that releases the request without sending a
//! frame. Both latch the context closed, and a closed context ignores any
//! further close attempt. That makes a late handler result on an evicted
//! connection a silent no-op instead of a double write.

use futures::SinkExt;
use http::{Response, StatusCode};
use tokio::io::AsyncWrite;
use tokio::time::Instant;
use tokio_util::codec::FramedWrite;
use tracing::trace;

use crate::codec::ResponseEncoder;
use crate::protocol::SendError;

/// Per-request response state over the connection's framed writer.
pub struct ResponseContext<'a, W> {
    framed_write: &'a mut FramedWrite<W, ResponseEncoder>,
    closed: bool,
    created: Instant,
}

impl<'a, W> ResponseContext<'a, W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(framed_write: &'a mut FramedWrite<W, ResponseEncoder>) -> Self {
        Self { framed_write, closed: false, created: Instant::now() }
    }

    /// Writes the one and only response for this request, then latches the
    /// context closed. Calling `close` again does nothing and succeeds.
    pub async fn close(&mut self, status: StatusCode, body: &str) -> Result<(), SendError> {
        if self.closed {
            trace!(status = %status, "response already closed, dropping write");
            return Ok(());
        }
        self.closed = true;

        let response = Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, mime::TEXT_HTML_UTF_8.as_ref())
            .body(body.to_string())
            .unwrap();

        let result = self.framed_write.send(response).await;
        trace!(status = %status, elapsed = ?self.created.elapsed(), "response closed");
        result
    }

    /// Latches the context closed without writing a frame. Used on the
    /// teardown path where the client must not receive a response.
    pub fn destroy(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn created(&self) -> Instant {
        self.created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn close_is_idempotent() {
        let (client, server) = tokio::io::duplex(4 * 1024);
        let mut framed_write = FramedWrite::new(server, ResponseEncoder::new());

        {
            let mut response = ResponseContext::new(&mut framed_write);
            response.close(StatusCode::OK, "OK").await.unwrap();
            assert!(response.is_closed());

            // second and third attempts must neither write nor fail
            response.close(StatusCode::INTERNAL_SERVER_ERROR, "again").await.unwrap();
            response.close(StatusCode::OK, "and again").await.unwrap();
        }
        drop(framed_write);

        let mut written = String::new();
        let mut client = client;
        client.read_to_string(&mut written).await.unwrap();

        assert_eq!(written.matches("HTTP/1.1").count(), 1);
        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(written.ends_with("\r\n\r\nOK"));
    }

    #[tokio::test]
    async fn destroy_suppresses_late_write() {
        let (client, server) = tokio::io::duplex(4 * 1024);
        let mut framed_write = FramedWrite::new(server, ResponseEncoder::new());

        {
            let mut response = ResponseContext::new(&mut framed_write);
            response.destroy();
            response.close(StatusCode::OK, "too late").await.unwrap();
        }
        drop(framed_write);

        let mut written = Vec::new();
        let mut client = client;
        client.read_to_end(&mut written).await.unwrap();
        assert!(written.is_empty());
    }
}
