use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, info, trace};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::{Handler, Validate};
use crate::pipeline::{PipelineError, RequestPipeline};
use crate::protocol::{HttpError, Message, ParseError, RequestContext, RequestHeader, ResponseContext};

/// Whether the connection survives the request it just finished.
enum Flow {
    Continue,
    Teardown,
}

/// Per-connection request loop.
///
/// `HttpConnection` owns the framed halves of one accepted socket and
/// processes requests on it until the peer goes away, a parse error makes
/// the stream unusable, or the pipeline decides on a teardown (size-limit
/// violation). Each request's pipeline outcome becomes exactly one
/// terminal event: a response written through [`ResponseContext`], or a
/// teardown with nothing written.
///
/// # Type Parameters
///
/// * `R`: the async readable half
/// * `W`: the async writable half
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    peer_addr: Option<SocketAddr>,
    content_size_limit: usize,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, peer_addr: Option<SocketAddr>, content_size_limit: usize) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            peer_addr,
            content_size_limit,
        }
    }

    pub async fn process<H, V>(mut self, handler: Arc<H>, validator: Arc<V>) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
        V: Validate + ?Sized,
    {
        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Header((header, _payload_size)))) => {
                    match self.handle_request(header, &handler, &validator).await? {
                        Flow::Continue => {}
                        Flow::Teardown => return Ok(()),
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    // the decoder state machine owes us a header here
                    error!("received body data while expecting a request head");
                    return Err(ParseError::invalid_header("body data while expecting a request head").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "can't parse next request");
                    let mut response = ResponseContext::new(&mut self.framed_write);
                    response.close(StatusCode::BAD_REQUEST, "Bad Request").await?;
                    return Err(e.into());
                }

                None => {
                    trace!("no more requests, connection done");
                    return Ok(());
                }
            }
        }
    }

    /// Runs the pipeline for one request and writes its terminal outcome.
    async fn handle_request<H, V>(&mut self, header: RequestHeader, handler: &Arc<H>, validator: &Arc<V>) -> Result<Flow, HttpError>
    where
        H: Handler + ?Sized,
        V: Validate + ?Sized,
    {
        let ctx = RequestContext::new(&header, self.peer_addr);
        trace!(method = %ctx.method(), client_ip = ctx.client_ip(), "request received");

        let outcome = {
            let mut pipeline = RequestPipeline::new(&mut self.framed_read, self.content_size_limit);
            pipeline.run(&ctx, handler.as_ref(), validator.as_ref()).await
        };

        let mut response = ResponseContext::new(&mut self.framed_write);
        match outcome {
            Ok(reply) => {
                response.close(StatusCode::OK, &reply).await?;
                Ok(Flow::Continue)
            }

            Err(PipelineError::Transport(e)) => {
                error!(cause = %e, "body read failed, tearing connection down");
                response.destroy();
                Err(e.into())
            }

            Err(e) if e.is_teardown() => {
                // size-limit violation: documented shed behavior, the client
                // gets an abrupt close instead of a response frame
                info!(cause = %e, client_ip = ctx.client_ip(), "destroying connection");
                response.destroy();
                Ok(Flow::Teardown)
            }

            Err(e) => {
                error!(cause = %e, method = %ctx.method(), client_ip = ctx.client_ip(), "request failed");
                response.close(e.status(), &e.client_message()).await?;
                Ok(Flow::Continue)
            }
        }
    }
}
