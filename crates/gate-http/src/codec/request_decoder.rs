//! Streaming HTTP/1.1 request decoder.
//!
//! [`RequestDecoder`] is a two-phase state machine driven by
//! `tokio_util::codec::FramedRead`:
//!
//! 1. Header phase: the request head is parsed with `httparse` and yielded
//!    as [`Message::Header`] together with its [`PayloadSize`].
//! 2. Body phase: a [`PayloadDecoder`] selected from the head yields body
//!    chunks and the final EOF marker, after which the decoder returns to
//!    the header phase for the next request on the connection.

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Method, Request, Uri};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::ensure;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Maximum number of headers accepted in a request head
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes accepted for the whole header section
const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug)]
pub struct RequestDecoder {
    /// `None` while parsing a head, `Some` while draining its body
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // body finished, next bytes belong to a new request head
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match decode_header(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}

fn decode_header(src: &mut BytesMut) -> Result<Option<(RequestHeader, PayloadSize)>, ParseError> {
    // shortest possible request line is longer than this
    if src.len() < 14 {
        return Ok(None);
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut request = httparse::Request::new(&mut headers);

    let parsed = request.parse(src).map_err(|e| match e {
        Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
        e => ParseError::invalid_header(e.to_string()),
    })?;

    match parsed {
        Status::Complete(body_offset) => {
            trace!(header_bytes = body_offset, "parsed request head");
            ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

            let version = match request.version {
                Some(0) => http::Version::HTTP_10,
                Some(1) => http::Version::HTTP_11,
                v => return Err(ParseError::InvalidVersion(v)),
            };

            let method =
                request.method.ok_or(ParseError::InvalidMethod)?.parse::<Method>().map_err(|_| ParseError::InvalidMethod)?;
            let uri = request.path.ok_or(ParseError::InvalidUri)?.parse::<Uri>().map_err(|_| ParseError::InvalidUri)?;

            let mut head = Request::new(());
            *head.method_mut() = method;
            *head.uri_mut() = uri;
            *head.version_mut() = version;

            head.headers_mut().reserve(request.headers.len());
            for parsed_header in request.headers.iter() {
                let name =
                    HeaderName::from_bytes(parsed_header.name.as_bytes()).map_err(|e| ParseError::invalid_header(e.to_string()))?;
                let value = HeaderValue::from_bytes(parsed_header.value).map_err(|e| ParseError::invalid_header(e.to_string()))?;
                head.headers_mut().append(name, value);
            }

            src.advance(body_offset);

            let header = RequestHeader::from(head);
            let payload_size = parse_payload_size(&header)?;

            Ok(Some((header, payload_size)))
        }
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
            Ok(None)
        }
    }
}

/// Selects the body framing for a request head.
///
/// Content-Length is honored on every method: the front end feeds any
/// declared body to the pipeline, which is what makes form bodies on GET
/// work. Transfer-Encoding and Content-Length together are rejected, per
/// [RFC 9112 Section 6.1](https://www.rfc-editor.org/rfc/rfc9112.html#name-transfer-encoding).
fn parse_payload_size(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Ok(PayloadSize::Empty)
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

            let length =
                cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            Ok(PayloadSize::Length(length))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer-encoding and content-length both present")),
    }
}

/// Chunked must be the final encoding when present.
fn is_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|b| *b == b',')
        .next()
        .is_some_and(|encoding| encoding.trim_ascii() == b"chunked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn decode_all(raw: &str) -> Vec<Message<(RequestHeader, PayloadSize)>> {
        let mut decoder = RequestDecoder::new();
        let mut buffer = BytesMut::from(raw);
        let mut messages = Vec::new();
        while let Some(message) = decoder.decode(&mut buffer).unwrap() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn decodes_request_without_body() {
        let raw = "GET /index HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let messages = decode_all(raw);

        assert_eq!(messages.len(), 2);
        match &messages[0] {
            Message::Header((header, payload_size)) => {
                assert_eq!(header.method(), Method::GET);
                assert_eq!(header.uri().path(), "/index");
                assert_eq!(header.host(), Some("example.com"));
                assert!(payload_size.is_empty());
            }
            Message::Payload(_) => panic!("expected header first"),
        }
        assert!(messages[1].is_payload());
    }

    #[test]
    fn decodes_content_length_body() {
        let raw = indoc! {"
            POST /submit HTTP/1.1\r
            Host: example.com\r
            Content-Length: 7\r
            \r
            {\"a\":1}"};
        let messages = decode_all(raw);

        assert_eq!(messages.len(), 3);
        match &messages[1] {
            Message::Payload(PayloadItem::Chunk(bytes)) => assert_eq!(bytes.as_ref(), b"{\"a\":1}"),
            _ => panic!("expected body chunk"),
        }
        assert!(matches!(&messages[2], Message::Payload(PayloadItem::Eof)));
    }

    #[test]
    fn honors_content_length_on_get() {
        let raw = "GET /q HTTP/1.1\r\nContent-Length: 7\r\n\r\na=1&b=2";
        let messages = decode_all(raw);

        assert_eq!(messages.len(), 3);
        match &messages[1] {
            Message::Payload(PayloadItem::Chunk(bytes)) => assert_eq!(bytes.as_ref(), b"a=1&b=2"),
            _ => panic!("expected body chunk"),
        }
    }

    #[test]
    fn decodes_chunked_body() {
        let raw = indoc! {"
            POST /submit HTTP/1.1\r
            Transfer-Encoding: chunked\r
            \r
            7\r
            {\"a\":1}\r
            0\r
            \r
        "};
        let messages = decode_all(raw);

        assert_eq!(messages.len(), 3);
        match &messages[0] {
            Message::Header((_, payload_size)) => assert!(payload_size.is_chunked()),
            Message::Payload(_) => panic!("expected header first"),
        }
        match &messages[1] {
            Message::Payload(PayloadItem::Chunk(bytes)) => assert_eq!(bytes.as_ref(), b"{\"a\":1}"),
            _ => panic!("expected body chunk"),
        }
    }

    #[test]
    fn keeps_alive_across_requests() {
        let raw = "GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let messages = decode_all(raw);

        let heads: Vec<_> = messages
            .iter()
            .filter_map(|message| match message {
                Message::Header((header, _)) => Some(header.uri().path().to_string()),
                Message::Payload(_) => None,
            })
            .collect();
        assert_eq!(heads, ["/a", "/b"]);
    }

    #[test]
    fn partial_head_needs_more_data() {
        let mut decoder = RequestDecoder::new();
        let mut buffer = BytesMut::from("GET /index HTTP/1.1\r\nHos");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn oversized_header_section_is_rejected() {
        let mut decoder = RequestDecoder::new();
        let mut raw = String::from("GET / HTTP/1.1\r\nx-filler: ");
        raw.push_str(&"a".repeat(MAX_HEADER_BYTES));
        let mut buffer = BytesMut::from(raw.as_str());

        let err = decoder.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, ParseError::TooLargeHeader { .. }));
    }

    #[test]
    fn conflicting_body_framings_are_rejected() {
        let mut decoder = RequestDecoder::new();
        let mut buffer = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\nabc");

        let err = decoder.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength { .. }));
    }

    #[test]
    fn bad_content_length_is_rejected() {
        let mut decoder = RequestDecoder::new();
        let mut buffer = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: banana\r\n\r\n");

        let err = decoder.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength { .. }));
    }
}
