use bytes::Bytes;

/// A decoded item on an HTTP request stream: either the head of a new
/// request or a piece of its body.
///
/// The request decoder yields exactly one `Header` per request, followed by
/// zero or more `Payload(Chunk)` items and a final `Payload(Eof)`.
#[derive(Debug)]
pub enum Message<T> {
    /// The request head together with whatever describes its body
    Header(T),
    /// A piece of the request body, or the end-of-body marker
    Payload(PayloadItem),
}

/// A single item of a request body stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of body bytes, in transport order
    Chunk(Bytes),
    /// End of the body; no more chunks will follow for this request
    Eof,
}

/// Describes how a request body is framed on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Body with a declared Content-Length
    Length(u64),
    /// Body using chunked transfer encoding
    Chunked,
    /// No body at all
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}

impl<T> Message<T> {
    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }

    #[inline]
    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }

    /// Returns the payload item if this message carries one.
    pub fn into_payload_item(self) -> Option<PayloadItem> {
        match self {
            Message::Header(_) => None,
            Message::Payload(item) => Some(item),
        }
    }
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    /// Returns the chunk bytes, or `None` for the EOF marker.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    /// Returns a reference to the chunk bytes, or `None` for the EOF marker.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
