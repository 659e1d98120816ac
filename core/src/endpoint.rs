//! Channel endpoint: one logical connection to one transport peer.
//!
//! An [`Endpoint`] binds a [`ConnectionFilter`] and an [`EnvelopeCodec`] to a
//! single target peer and feeds everything it accepts into its own
//! [`EventRouter`].
//!
//! ```text
//! outbound:  send() ──▶ codec.encode ──▶ transport.post(target, scope)
//!
//! inbound:   transport ──▶ receive()
//!                            ├─ source != target ─────────────▶ dropped
//!                            ├─ decode ok ─▶ filter ─ reject ─▶ dropped
//!                            │                ├─ blank type ──▶ router.trigger("message", raw)
//!                            │                └──── accept ───▶ router.trigger(type, data)
//!                            └─ decode failed ────────────────▶ router.trigger("message", raw)
//! ```
//!
//! The endpoint registers one listener with the transport when it is created
//! and removes it on [`Endpoint::close`] or drop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, Weak};
use tracing::{debug, info};

use crate::envelope::{Decoded, EnvelopeCodec, Payload};
use crate::event::{self, EventRouter, Handler, RawEvent, SubscribeOptions, RAW_MESSAGE_EVENT};
use crate::filter::{ConnectionFilter, IsolationMode};
use crate::transport::{InboundHandler, InboundMessage, ListenerId, PeerHandle, Transport};
use crate::{BusError, Result};

pub use crate::transport::TargetScope;

/// Endpoint configuration, replaced wholesale by [`Endpoint::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// The only peer whose messages are accepted, and where sends go
    pub target: PeerHandle,
    /// Stamped on every outbound envelope
    pub connection_id: Option<String>,
    /// Origin restriction handed to the transport on every send
    pub target_scope: TargetScope,
    /// `None` derives the mode from `connection_id`
    pub isolation: Option<IsolationMode>,
}

impl EndpointConfig {
    pub fn new(target: PeerHandle) -> Self {
        Self {
            target,
            connection_id: None,
            target_scope: TargetScope::Any,
            isolation: None,
        }
    }

    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_scope(mut self, scope: TargetScope) -> Self {
        self.target_scope = scope;
        self
    }

    pub fn with_isolation(mut self, mode: IsolationMode) -> Self {
        self.isolation = Some(mode);
        self
    }

    /// Effective isolation mode.
    pub fn isolation_mode(&self) -> IsolationMode {
        self.isolation
            .unwrap_or_else(|| IsolationMode::implied_by(self.connection_id.as_deref()))
    }

    pub fn validate(&self) -> Result<()> {
        self.filter().map(|_| ())
    }

    fn filter(&self) -> Result<ConnectionFilter> {
        ConnectionFilter::new(self.connection_id.clone(), self.isolation_mode())
    }
}

/// Endpoint counters
#[derive(Debug, Default)]
struct EndpointStats {
    sent: AtomicU64,
    sent_raw: AtomicU64,
    received: AtomicU64,
    dispatched: AtomicU64,
    raw_fallbacks: AtomicU64,
    dropped_source: AtomicU64,
    dropped_filter: AtomicU64,
}

/// Point-in-time copy of an endpoint's counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointStatsSnapshot {
    pub sent: u64,
    pub sent_raw: u64,
    pub received: u64,
    pub dispatched: u64,
    pub raw_fallbacks: u64,
    pub dropped_source: u64,
    pub dropped_filter: u64,
}

impl EndpointStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EndpointStatsSnapshot {
        EndpointStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            sent_raw: self.sent_raw.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            raw_fallbacks: self.raw_fallbacks.load(Ordering::Relaxed),
            dropped_source: self.dropped_source.load(Ordering::Relaxed),
            dropped_filter: self.dropped_filter.load(Ordering::Relaxed),
        }
    }
}

struct EndpointState {
    config: EndpointConfig,
    filter: ConnectionFilter,
}

// State reachable from the transport listener
struct Shared {
    state: RwLock<EndpointState>,
    codec: EnvelopeCodec,
    router: EventRouter,
    stats: EndpointStats,
    closed: AtomicBool,
}

impl Shared {
    fn read_state(&self) -> RwLockReadGuard<'_, EndpointState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn receive(&self, message: &InboundMessage) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        EndpointStats::bump(&self.stats.received);

        // Lock is released before dispatch so callbacks may reconfigure
        let decoded = {
            let state = self.read_state();
            if state.config.target != message.source {
                EndpointStats::bump(&self.stats.dropped_source);
                debug!(
                    source = %message.source.label(),
                    expected = %state.config.target.label(),
                    "Dropped message from unexpected source"
                );
                return 0;
            }
            match self.codec.decode(&message.payload) {
                Decoded::Envelope(envelope)
                    if !state.filter.accepts(envelope.connection_id.as_deref()) =>
                {
                    EndpointStats::bump(&self.stats.dropped_filter);
                    debug!(
                        remote = ?envelope.connection_id,
                        local = ?state.filter.connection_id(),
                        event_type = %envelope.event_type,
                        "Dropped envelope for another connection"
                    );
                    return 0;
                }
                decoded => decoded,
            }
        };

        match decoded {
            // A type naming no event would reach no subscriber, not even "all"
            Decoded::Envelope(envelope)
                if event::event_types(&envelope.event_type).next().is_none() =>
            {
                EndpointStats::bump(&self.stats.raw_fallbacks);
                debug!(
                    event_type = ?envelope.event_type,
                    "Envelope without event type routed to raw channel"
                );
                self.router.trigger(
                    RAW_MESSAGE_EVENT,
                    None,
                    Some(RawEvent::Wire(message.payload.clone())),
                )
            }
            Decoded::Envelope(envelope) => {
                EndpointStats::bump(&self.stats.dispatched);
                let event_type = envelope.event_type.clone();
                let data = envelope.data.clone();
                self.router
                    .trigger(&event_type, data, Some(RawEvent::Envelope(envelope)))
            }
            Decoded::Raw(failure) => {
                EndpointStats::bump(&self.stats.raw_fallbacks);
                debug!(
                    reason = %failure.reason,
                    bytes = failure.wire.len(),
                    "Undecodable payload routed to raw channel"
                );
                self.router
                    .trigger(RAW_MESSAGE_EVENT, None, Some(RawEvent::Wire(failure.wire)))
            }
        }
    }
}

/// Typed event channel to one transport peer.
///
/// Subscriptions live as long as the endpoint and survive
/// [`configure`](Self::configure).
pub struct Endpoint {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    listener: Mutex<Option<ListenerId>>,
}

impl Endpoint {
    /// Validates `config` and starts listening on `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: EndpointConfig) -> Result<Self> {
        let filter = config.filter()?;
        info!(
            target_peer = %config.target.label(),
            connection_id = ?config.connection_id,
            scope = %config.target_scope,
            isolation = ?filter.mode(),
            "Creating endpoint"
        );

        let shared = Arc::new(Shared {
            state: RwLock::new(EndpointState { config, filter }),
            codec: EnvelopeCodec::new(),
            router: EventRouter::new(),
            stats: EndpointStats::default(),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let handler: InboundHandler = Arc::new(move |message: &InboundMessage| {
            if let Some(shared) = weak.upgrade() {
                shared.receive(message);
            }
        });
        let listener = transport.listen(handler);

        Ok(Self {
            shared,
            transport,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Replaces target, scope, connection id and isolation mode.
    ///
    /// Subscriptions are left untouched. On error the previous configuration
    /// stays in effect.
    pub fn configure(&self, config: EndpointConfig) -> Result<()> {
        let filter = config.filter()?;
        info!(
            target_peer = %config.target.label(),
            connection_id = ?config.connection_id,
            scope = %config.target_scope,
            isolation = ?filter.mode(),
            "Reconfigured endpoint"
        );
        let mut state = self
            .shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *state = EndpointState { config, filter };
        Ok(())
    }

    pub fn config(&self) -> EndpointConfig {
        self.shared.read_state().config.clone()
    }

    /// Sends a structured event to the peer.
    ///
    /// `data` must be a JSON object or absent; anything else fails with
    /// [`BusError::InvalidPayloadKind`] and nothing is sent.
    pub fn send(&self, event_type: &str, data: Option<Value>) -> Result<()> {
        self.ensure_open()?;
        let (wire, target, scope) = {
            let state = self.shared.read_state();
            let wire = self.shared.codec.encode(
                state.config.connection_id.as_deref(),
                event_type,
                data,
            )?;
            (
                wire,
                state.config.target.clone(),
                state.config.target_scope.clone(),
            )
        };
        self.transport.post(wire, &target, &scope)?;
        EndpointStats::bump(&self.shared.stats.sent);
        debug!(event_type = %event_type, target_peer = %target.label(), "Sent event");
        Ok(())
    }

    /// Sends any serializable value as the event payload.
    pub fn send_with<T: Serialize + ?Sized>(&self, event_type: &str, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.send(event_type, Some(value))
    }

    /// Sends a bare value with no envelope.
    ///
    /// The peer sees it on the `"message"` channel. Raw messages carry no
    /// connection id, so the peer cannot tell which endpoint sent them.
    pub fn send_raw<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.ensure_open()?;
        let wire = self.shared.codec.encode_raw(value)?;
        let (target, scope) = {
            let state = self.shared.read_state();
            (
                state.config.target.clone(),
                state.config.target_scope.clone(),
            )
        };
        self.transport.post(wire, &target, &scope)?;
        EndpointStats::bump(&self.shared.stats.sent_raw);
        debug!(target_peer = %target.label(), "Sent raw message");
        Ok(())
    }

    /// Handles one inbound message and returns the number of callbacks run.
    ///
    /// Called by the transport listener; hosts that deliver messages
    /// themselves may call it directly.
    pub fn receive(&self, message: &InboundMessage) -> usize {
        self.shared.receive(message)
    }

    pub fn on(&self, types: &str, handler: &Handler) -> usize {
        self.shared.router.on(types, handler)
    }

    pub fn once(&self, types: &str, handler: &Handler) -> usize {
        self.shared.router.once(types, handler)
    }

    pub fn subscribe(&self, types: &str, handler: &Handler, options: SubscribeOptions) -> usize {
        self.shared.router.subscribe(types, handler, options)
    }

    pub fn off(&self, types: Option<&str>, handler: Option<&Handler>) -> usize {
        self.shared.router.unsubscribe(types, handler)
    }

    /// Dispatches locally, without touching the transport.
    pub fn trigger(&self, types: &str, data: Option<Payload>, raw: Option<Value>) -> usize {
        self.shared.router.trigger(types, data, raw.map(RawEvent::Value))
    }

    pub fn router(&self) -> &EventRouter {
        &self.shared.router
    }

    pub fn stats(&self) -> EndpointStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Deregisters the transport listener.
    ///
    /// Afterwards sends fail with [`BusError::Closed`] and inbound messages
    /// are ignored. Returns false if the endpoint was already closed.
    pub fn close(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = listener {
            self.transport.unlisten(id);
        }
        info!(
            target_peer = %self.shared.read_state().config.target.label(),
            "Endpoint closed"
        );
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}
