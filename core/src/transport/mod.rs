//! Transport boundary: the host-provided one-way channel between contexts.
//!
//! Framebus never talks to a concrete messaging API directly. A host plugs in
//! a [`Transport`] that can post a string to a peer and deliver inbound
//! strings to registered listeners:
//!
//! - `post`: fire-and-forget send to one peer, restricted to a [`TargetScope`]
//! - `listen`: register a handler invoked once per inbound message, in arrival order
//! - `unlisten`: deregister it again
//!
//! [`memory`] provides an in-process implementation used by tests and demos.

pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{BusError, Result};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

struct PeerInner {
    id: u64,
    label: String,
}

/// Opaque handle to a remote execution context.
///
/// Equality is identity: two handles are equal only if one was cloned from
/// the other, never because their labels match.
#[derive(Clone)]
pub struct PeerHandle(Arc<PeerInner>);

impl PeerHandle {
    pub fn new(label: impl Into<String>) -> Self {
        Self(Arc::new(PeerInner {
            id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }))
    }

    /// Process-unique numeric id, for lookups and logs.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for PeerHandle {}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.0.id)
            .field("label", &self.0.label)
            .finish()
    }
}

/// Which remote origin a posted message may be delivered to.
///
/// Written as `"*"` (or `"any"`) for no restriction, otherwise as the origin
/// string itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TargetScope {
    #[default]
    Any,
    Origin(String),
}

impl TargetScope {
    pub fn origin(origin: impl Into<String>) -> Self {
        TargetScope::Origin(origin.into())
    }

    /// True when a receiver at `origin` may see messages posted with this scope.
    pub fn permits(&self, origin: &str) -> bool {
        match self {
            TargetScope::Any => true,
            TargetScope::Origin(expected) => expected == origin,
        }
    }
}

impl FromStr for TargetScope {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(BusError::InvalidConfig("target scope must not be empty".into())),
            "*" => Ok(TargetScope::Any),
            t if t.eq_ignore_ascii_case("any") => Ok(TargetScope::Any),
            t => Ok(TargetScope::Origin(t.to_string())),
        }
    }
}

impl TryFrom<String> for TargetScope {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TargetScope> for String {
    fn from(scope: TargetScope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for TargetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetScope::Any => f.write_str("*"),
            TargetScope::Origin(origin) => f.write_str(origin),
        }
    }
}

/// One message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Context that posted the message
    pub source: PeerHandle,
    /// Origin of the posting context, as reported by the host
    pub origin: String,
    /// Serialized payload, verbatim
    pub payload: String,
}

/// Token returned by [`Transport::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Callback receiving every inbound message, whatever its source.
pub type InboundHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Host messaging primitive.
pub trait Transport: Send + Sync {
    /// Hands `message` to the host for delivery to `target`.
    ///
    /// Success means the host accepted the message, not that anyone received it.
    fn post(&self, message: String, target: &PeerHandle, scope: &TargetScope) -> Result<()>;

    /// Registers a delivery handler.
    fn listen(&self, handler: InboundHandler) -> ListenerId;

    /// Deregisters a handler. Returns false if it was not registered.
    fn unlisten(&self, id: ListenerId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_equality_is_identity() {
        let a = PeerHandle::new("frame");
        let b = PeerHandle::new("frame");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(b.label(), "frame");
    }

    #[test]
    fn scope_parsing_and_display() {
        assert_eq!("*".parse::<TargetScope>().unwrap(), TargetScope::Any);
        assert_eq!("ANY".parse::<TargetScope>().unwrap(), TargetScope::Any);
        assert_eq!(
            " https://a.example ".parse::<TargetScope>().unwrap(),
            TargetScope::origin("https://a.example")
        );
        assert!("  ".parse::<TargetScope>().is_err());
        assert_eq!(TargetScope::Any.to_string(), "*");
        assert_eq!(TargetScope::origin("https://b.example").to_string(), "https://b.example");
    }

    #[test]
    fn scope_permits() {
        assert!(TargetScope::Any.permits("https://x.example"));
        let s = TargetScope::origin("https://x.example");
        assert!(s.permits("https://x.example"));
        assert!(!s.permits("https://y.example"));
    }

    #[test]
    fn scope_serde_as_string() {
        let json = serde_json::to_string(&TargetScope::origin("https://x.example")).unwrap();
        assert_eq!(json, r#""https://x.example""#);
        let any: TargetScope = serde_json::from_str(r#""*""#).unwrap();
        assert_eq!(any, TargetScope::Any);
        assert!(serde_json::from_str::<TargetScope>(r#""""#).is_err());
    }
}
