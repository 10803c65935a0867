//! Single-frame HTTP/1.1 response encoder.
//!
//! Every response the front end produces is a short, fully materialized
//! string body, so the encoder writes status line, headers, Content-Length
//! and body in one frame. Chunked responses and streaming bodies are not
//! needed here.

use bytes::{BufMut, BytesMut};
use http::{Response, Version, header};
use tokio_util::codec::Encoder;

use crate::ensure;
use crate::protocol::SendError;

/// Room for the status line and the handful of headers we write
const INIT_RESPONSE_SIZE: usize = 256;

#[derive(Debug, Default)]
pub struct ResponseEncoder;

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Encoder<Response<String>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, response: Response<String>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (parts, body) = response.into_parts();

        ensure!(parts.version == Version::HTTP_11, SendError::UnsupportedVersion(parts.version));

        dst.reserve(INIT_RESPONSE_SIZE + body.len());

        dst.put_slice(b"HTTP/1.1 ");
        dst.put_slice(parts.status.as_str().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(parts.status.canonical_reason().unwrap_or("Unknown").as_bytes());
        dst.put_slice(b"\r\n");

        for (name, value) in parts.headers.iter() {
            // the body length on the wire is authoritative
            if name == header::CONTENT_LENGTH {
                continue;
            }
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }

        dst.put_slice(b"content-length: ");
        dst.put_slice(body.len().to_string().as_bytes());
        dst.put_slice(b"\r\n\r\n");
        dst.put_slice(body.as_bytes());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn encode(response: Response<String>) -> String {
        let mut encoder = ResponseEncoder::new();
        let mut buffer = BytesMut::new();
        encoder.encode(response, &mut buffer).unwrap();
        String::from_utf8(buffer.to_vec()).unwrap()
    }

    #[test]
    fn encodes_success_response() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime::TEXT_HTML_UTF_8.as_ref())
            .body("OK".to_string())
            .unwrap();

        let encoded = encode(response);
        assert_eq!(encoded, "HTTP/1.1 200 OK\r\ncontent-type: text/html; charset=utf-8\r\ncontent-length: 2\r\n\r\nOK");
    }

    #[test]
    fn overrides_stale_content_length() {
        let response = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header(header::CONTENT_LENGTH, "999")
            .body("Bad Request: Invalid payload type".to_string())
            .unwrap();

        let encoded = encode(response);
        assert!(encoded.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(encoded.contains("content-length: 33\r\n"));
        assert!(!encoded.contains("999"));
    }

    #[test]
    fn rejects_non_http11() {
        let response = Response::builder().version(Version::HTTP_2).status(StatusCode::OK).body(String::new()).unwrap();

        let mut encoder = ResponseEncoder::new();
        let mut buffer = BytesMut::new();
        let err = encoder.encode(response, &mut buffer).unwrap_err();
        assert!(matches!(err, SendError::UnsupportedVersion(_)));
    }
}
