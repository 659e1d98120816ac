// Framebus Core Library
// Typed publish/subscribe events layered over a one-way cross-window channel

pub mod endpoint;
pub mod envelope;
pub mod event;
pub mod filter;
pub mod telemetry;
pub mod transport;

// Export core types
pub use endpoint::{Endpoint, EndpointConfig, EndpointStatsSnapshot, TargetScope};
pub use envelope::{DecodeFailure, Decoded, Envelope, EnvelopeCodec, Payload};
pub use event::{
    Event, EventRouter, Handler, RawEvent, RouterStats, SubscribeOptions, RAW_MESSAGE_EVENT,
    WILDCARD_EVENT,
};
pub use filter::{ConnectionFilter, IsolationMode};
pub use transport::memory::{MemoryHub, MemoryWindow, DEFAULT_QUEUE_CAPACITY};
pub use transport::{InboundHandler, InboundMessage, ListenerId, PeerHandle, Transport};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid payload kind: expected a JSON object, got {kind}")]
    InvalidPayloadKind { kind: &'static str },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Endpoint closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, BusError>;
