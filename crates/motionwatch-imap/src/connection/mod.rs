//! Connection layer: transport, framing and the type-state client.

mod client;
mod framed;
mod stream;

pub use client::{Authenticated, Client, FetchedMessage, NotAuthenticated, Selected};
pub use framed::FramedStream;
pub use stream::{ImapStream, connect_plain, connect_tls, tls_connector};
