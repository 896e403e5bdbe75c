//! `jsonlink` — a bidirectional JSON-message transport for local-socket and
//! TCP IPC, plus a small server-side connection registry and JSON Schema
//! (draft-3 subset) validator.
//!
//! Modules roughly track the component boundaries of the design: framing
//! and wire codecs at the bottom, [`stream::Stream`] and [`pipe::Pipe`] as
//! the two device-backed transports, [`connection::Connection`] and
//! [`endpoint::Endpoint`] as the multi-endpoint client, and [`server`] as
//! the accept-side registry with pluggable [`server::authority::Authority`]
//! and [`schema`] validation.

pub mod codec;
pub mod connection;
pub mod device;
pub mod endpoint;
pub mod format;
pub mod framing;
pub mod peer_creds;
pub mod pipe;
pub mod router;
pub mod schema;
pub mod server;
pub mod stream;
pub mod value;

pub use connection::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState};
pub use endpoint::Endpoint;
pub use format::Format;
pub use pipe::{Pipe, PipeError, PipeEvent};
pub use server::{Server, ServerConfig, ServerEvent};
pub use stream::{Stream, StreamError, StreamEvent};
pub use value::{JsonObject, JsonValue, Message};
