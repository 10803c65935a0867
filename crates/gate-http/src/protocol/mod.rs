//! Protocol vocabulary shared by the codec, the pipeline and the server.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: items flowing out of the
//!   request decoder.
//! - [`RequestHeader`], [`RequestContext`]: the request head and the
//!   fixed-field view of it handed to validators and handlers.
//! - [`ResponseContext`]: per-request response state with an idempotent
//!   close.
//! - [`HttpError`], [`ParseError`], [`SendError`]: the transport-level
//!   error taxonomy.

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestContext;
pub use request::RequestHeader;

mod response;
pub use response::ResponseContext;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
