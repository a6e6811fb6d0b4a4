//! ---
//! tsc_section: "02-messaging-ipc-data-model"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Command envelopes, topics, and publish transports."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Messaging primitives: inbound command envelopes, the outbound topic
//! layout, and the transports that carry published messages.

pub mod publisher;
pub mod source;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised while decoding or delivering messages.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Wrapper for IO errors encountered during messaging operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// An inbound topic does not sit under the command prefix.
    #[error("topic '{0}' is not a command topic")]
    NotACommand(String),
    /// The inbound command queue has been closed.
    #[error("command channel closed")]
    ChannelClosed,
}

pub use publisher::{Publisher, PublisherMetrics};
pub use source::{pump_json_lines, InboundLine};
pub use transport::{InMemoryTransport, JsonLinesTransport, Transport};
pub use types::{CommandEnvelope, Message, Topics};
