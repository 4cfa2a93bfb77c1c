//! # motionwatch-mime
//!
//! MIME handling for camera notification mail.
//!
//! Parsing covers nested multipart bodies, base64 and quoted-printable
//! transfer encodings, encoded-word headers and extraction of image
//! attachments. Generation builds the outgoing alert: a `multipart/mixed`
//! message with a text part and the snapshot attached.
//!
//! ## Example
//!
//! ```
//! use motionwatch_mime::Message;
//!
//! let raw = b"Subject: Motion DetectStart\r\nContent-Type: image/png\r\n\
//! Content-Transfer-Encoding: base64\r\n\r\niVBORw0K\r\n";
//! let msg = Message::parse(raw).unwrap();
//! assert_eq!(msg.image_attachments().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod builder;
pub mod content_type;
pub mod encoding;
mod error;
pub mod header;
pub mod message;

pub use builder::MessageBuilder;
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Attachment, Message, Part, TransferEncoding};
