//! Body phase decoders for the two framings the front end accepts:
//! Content-Length bodies and chunked transfer encoding
//! ([RFC 9112 Section 7.1](https://www.rfc-editor.org/rfc/rfc9112.html#name-chunked-transfer-coding)).
//!
//! Both produce [`PayloadItem`]s; the request decoder drives whichever one
//! the request head selected until it yields [`PayloadItem::Eof`].

use std::cmp;

use bytes::{Buf, BytesMut};
use httparse::Status;
use tokio_util::codec::Decoder;

use crate::ensure;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Decodes a body with a declared Content-Length.
///
/// Tracks the bytes still owed by the client and yields `Eof` once the
/// declared length has been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = cmp::min(self.remaining, src.len() as u64);
        let bytes = src.split_to(len as usize).freeze();

        self.remaining -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

/// Decodes a chunked transfer encoded body.
///
/// Chunk size lines are parsed with [`httparse::parse_chunk_size`]; chunk
/// data may be yielded in pieces as it arrives. Trailer fields after the
/// last chunk are consumed and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Reading a chunk size line
    Size,
    /// Reading chunk data, with this many bytes left in the chunk
    Data { remaining: u64 },
    /// Reading the CRLF that terminates a chunk's data
    DataCrlf,
    /// Reading (and discarding) trailer lines after the last chunk
    Trailer,
    /// Body fully read
    Done,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: ChunkedState::Size }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ChunkedState::Size => {
                    let (consumed, size) = match httparse::parse_chunk_size(src) {
                        Ok(Status::Complete(parsed)) => parsed,
                        Ok(Status::Partial) => return Ok(None),
                        Err(_) => return Err(ParseError::invalid_chunk("invalid chunk size line")),
                    };
                    src.advance(consumed);
                    self.state = if size == 0 { ChunkedState::Trailer } else { ChunkedState::Data { remaining: size } };
                }

                ChunkedState::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = cmp::min(remaining, src.len() as u64);
                    let bytes = src.split_to(len as usize).freeze();

                    let left = remaining - bytes.len() as u64;
                    self.state = if left == 0 { ChunkedState::DataCrlf } else { ChunkedState::Data { remaining: left } };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                ChunkedState::DataCrlf => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    ensure!(&src[..2] == b"\r\n", ParseError::invalid_chunk("chunk data must end with CRLF"));
                    src.advance(2);
                    self.state = ChunkedState::Size;
                }

                ChunkedState::Trailer => {
                    // the trailer section ends at an empty line; individual
                    // trailer fields are not surfaced
                    match find_crlf(src) {
                        Some(0) => {
                            src.advance(2);
                            self.state = ChunkedState::Done;
                        }
                        Some(end) => src.advance(end + 2),
                        None => return Ok(None),
                    }
                }

                ChunkedState::Done => return Ok(Some(PayloadItem::Eof)),
            }
        }
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|window| window == b"\r\n")
}

/// The body phase selected by a request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoder {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    Empty,
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => PayloadDecoder::Length(LengthDecoder::new(length)),
            PayloadSize::Chunked => PayloadDecoder::Chunked(ChunkedDecoder::new()),
            PayloadSize::Empty => PayloadDecoder::Empty,
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            PayloadDecoder::Length(decoder) => decoder.decode(src),
            PayloadDecoder::Chunked(decoder) => decoder.decode(src),
            PayloadDecoder::Empty => Ok(Some(PayloadItem::Eof)),
        }
    }
}
