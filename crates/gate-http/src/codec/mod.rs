//! Wire codecs for the front end.
//!
//! - [`RequestDecoder`]: streaming request decoder, header phase then body
//!   phase (Content-Length or chunked).
//! - [`ResponseEncoder`]: single-frame response encoder.
//!
//! Both plug into `tokio_util::codec`'s `FramedRead`/`FramedWrite`.

pub mod body;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
