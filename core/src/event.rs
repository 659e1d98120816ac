// Event router implementation
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::envelope::{Envelope, Payload};

/// Subscribers of this type receive every dispatched event.
pub const WILDCARD_EVENT: &str = "all";

/// Event type used for inbound payloads that are not structured envelopes.
pub const RAW_MESSAGE_EVENT: &str = "message";

/// Original value behind a dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// Decoded envelope an inbound event was built from
    Envelope(Envelope),
    /// Inbound payload that failed envelope decoding, verbatim
    Wire(String),
    /// Value handed to `trigger` by local code
    Value(Value),
}

/// One dispatched event. Built fresh for each event type in a trigger call.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: String,
    data: Option<Payload>,
    raw: Option<RawEvent>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: Option<Payload>, raw: Option<RawEvent>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            raw,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    pub fn raw(&self) -> Option<&RawEvent> {
        self.raw.as_ref()
    }

    /// Looks up one field of the payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }

    /// The raw event as JSON.
    ///
    /// Wire payloads are parsed, so values sent with `send_raw` come back in
    /// their original shape. Returns `None` for non-JSON wire text.
    pub fn raw_json(&self) -> Option<Value> {
        match self.raw.as_ref()? {
            RawEvent::Envelope(env) => serde_json::to_value(env).ok(),
            RawEvent::Wire(wire) => serde_json::from_str(wire).ok(),
            RawEvent::Value(v) => Some(v.clone()),
        }
    }
}

type Callback = dyn Fn(&Event) + Send + Sync;

/// Subscriber callback.
///
/// Clones share identity: unsubscribing with any clone removes the
/// registration made with another. Two handlers built from identical
/// closures are distinct.
#[derive(Clone)]
pub struct Handler(Arc<Callback>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Handler invoked with an explicit context value.
    ///
    /// ```
    /// use framebus_core::{EventRouter, Handler};
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    ///
    /// let counter = Arc::new(AtomicUsize::new(0));
    /// let handler = Handler::bound(Arc::clone(&counter), |c, _evt| {
    ///     c.fetch_add(1, Ordering::SeqCst);
    /// });
    ///
    /// let router = EventRouter::new();
    /// router.on("tick", &handler);
    /// router.trigger("tick", None, None);
    /// assert_eq!(counter.load(Ordering::SeqCst), 1);
    /// ```
    pub fn bound<C, F>(context: Arc<C>, f: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &Event) + Send + Sync + 'static,
    {
        Self::new(move |event| f(&context, event))
    }

    fn call(&self, event: &Event) {
        (self.0)(event)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.addr()).finish()
    }
}

/// Options for one subscribe call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Drop the registration after its first invocation
    pub once: bool,
}

/// Subscription record
#[derive(Debug, Clone)]
struct Subscription {
    // Shared by every type registered in the same call
    id: u64,
    handler: Handler,
    once: bool,
}

/// Router statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterStats {
    pub triggered: u64,
    pub invocations: u64,
    pub active_subscriptions: usize,
}

/// Splits an event-type list on whitespace and commas.
pub fn event_types(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

/// Named-event subscription registry with synchronous, ordered dispatch.
///
/// Dispatch iterates over a snapshot of each subscriber list, so callbacks may
/// subscribe or unsubscribe (themselves included) while an event is being
/// delivered. Changes take effect from the next dispatch, with one exception:
/// a `once` registration is removed before its callback runs and is skipped if
/// it is already gone.
#[derive(Default)]
pub struct EventRouter {
    // Event type -> records in registration order
    subscriptions: DashMap<String, Vec<Subscription>>,
    next_id: AtomicU64,
    triggered: AtomicU64,
    invocations: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under every type in `types`.
    ///
    /// Returns the number of types registered.
    pub fn subscribe(&self, types: &str, handler: &Handler, options: SubscribeOptions) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registered = 0;
        for event_type in event_types(types) {
            self.subscriptions
                .entry(event_type.to_string())
                .or_default()
                .push(Subscription {
                    id,
                    handler: handler.clone(),
                    once: options.once,
                });
            registered += 1;
        }
        debug!(
            types = %types,
            registered,
            once = options.once,
            "Subscribed handler"
        );
        registered
    }

    pub fn on(&self, types: &str, handler: &Handler) -> usize {
        self.subscribe(types, handler, SubscribeOptions::default())
    }

    pub fn once(&self, types: &str, handler: &Handler) -> usize {
        self.subscribe(types, handler, SubscribeOptions { once: true })
    }

    /// Removes subscriptions and returns how many records were dropped.
    ///
    /// - no arguments: everything
    /// - types only: every record under each named type
    /// - types and handler: the first record of that handler under each type
    /// - handler only: every record of that handler under any type
    pub fn unsubscribe(&self, types: Option<&str>, handler: Option<&Handler>) -> usize {
        let removed = match (types, handler) {
            (None, None) => {
                let count = self.total_subscriptions();
                self.subscriptions.clear();
                count
            }
            (Some(types), None) => event_types(types)
                .filter_map(|t| self.subscriptions.remove(t))
                .map(|(_, subs)| subs.len())
                .sum(),
            (Some(types), Some(handler)) => event_types(types)
                .filter(|t| self.remove_first(t, |s| s.handler == *handler))
                .count(),
            (None, Some(handler)) => {
                let mut count = 0;
                self.subscriptions.retain(|_, subs| {
                    let before = subs.len();
                    subs.retain(|s| s.handler != *handler);
                    count += before - subs.len();
                    !subs.is_empty()
                });
                count
            }
        };
        debug!(types = ?types, removed, "Unsubscribed");
        removed
    }

    /// Removes every subscription.
    pub fn clear(&self) -> usize {
        self.unsubscribe(None, None)
    }

    /// Dispatches one event per type in `types`, left to right.
    ///
    /// Each event goes to the subscribers of its exact type and then to the
    /// wildcard subscribers. Returns the number of callback invocations.
    pub fn trigger(&self, types: &str, data: Option<Payload>, raw: Option<RawEvent>) -> usize {
        let mut invoked = 0;
        for event_type in event_types(types) {
            self.triggered.fetch_add(1, Ordering::Relaxed);
            let event = Event::new(event_type, data.clone(), raw.clone());
            invoked += self.fire(event_type, &event);
            // A wildcard trigger already reached the wildcard subscribers
            if event_type != WILDCARD_EVENT {
                invoked += self.fire(WILDCARD_EVENT, &event);
            }
        }
        self.invocations.fetch_add(invoked as u64, Ordering::Relaxed);
        invoked
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscriptions
            .get(event_type)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn total_subscriptions(&self) -> usize {
        self.subscriptions.iter().map(|e| e.value().len()).sum()
    }

    /// Types with at least one subscriber, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            triggered: self.triggered.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            active_subscriptions: self.total_subscriptions(),
        }
    }

    fn fire(&self, bucket: &str, event: &Event) -> usize {
        // Guard must be released before any callback runs
        let snapshot = match self.subscriptions.get(bucket) {
            Some(subs) => subs.value().clone(),
            None => return 0,
        };

        let mut invoked = 0;
        for sub in snapshot {
            if sub.once && !self.remove_first(bucket, |s| s.id == sub.id) {
                continue;
            }
            sub.handler.call(event);
            invoked += 1;
        }
        trace!(
            bucket = %bucket,
            event_type = %event.event_type(),
            invoked,
            "Dispatched event"
        );
        invoked
    }

    fn remove_first<P>(&self, event_type: &str, predicate: P) -> bool
    where
        P: Fn(&Subscription) -> bool,
    {
        let removed = match self.subscriptions.get_mut(event_type) {
            Some(mut subs) => match subs.iter().position(|s| predicate(s)) {
                Some(pos) => {
                    subs.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        };
        if removed {
            self.subscriptions.remove_if(event_type, |_, subs| subs.is_empty());
        }
        removed
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("types", &self.registered_types())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_types_split_on_commas_and_whitespace() {
        let types: Vec<&str> = event_types(" hello, hi\tbye,,\n x ").collect();
        assert_eq!(types, vec!["hello", "hi", "bye", "x"]);
        assert_eq!(event_types("").count(), 0);
        assert_eq!(event_types(" , ").count(), 0);
    }

    #[test]
    fn handler_identity_follows_clones() {
        let a = Handler::new(|_| {});
        let b = Handler::new(|_| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn raw_json_by_variant() {
        let wire = Event::new("message", None, Some(RawEvent::Wire("[1,2]".into())));
        assert_eq!(wire.raw_json(), Some(json!([1, 2])));

        let junk = Event::new("message", None, Some(RawEvent::Wire("<html>".into())));
        assert_eq!(junk.raw_json(), None);

        let env = Envelope::new(Some("c".into()), "t", None);
        let evt = Event::new("t", None, Some(RawEvent::Envelope(env)));
        assert_eq!(
            evt.raw_json(),
            Some(json!({"connectionID": "c", "type": "t", "data": null}))
        );

        assert_eq!(Event::new("t", None, None).raw_json(), None);
    }

    #[test]
    fn subscribe_reports_registered_type_count() {
        let router = EventRouter::new();
        let h = Handler::new(|_| {});
        assert_eq!(router.on("a, b c", &h), 3);
        assert_eq!(router.on("", &h), 0);
        assert_eq!(router.total_subscriptions(), 3);
        assert_eq!(router.registered_types(), vec!["a", "b", "c"]);
    }

    #[test]
    fn once_removal_drops_empty_bucket() {
        let router = EventRouter::new();
        router.once("ping", &Handler::new(|_| {}));
        assert_eq!(router.trigger("ping", None, None), 1);
        assert!(router.registered_types().is_empty());
    }

    #[test]
    fn stats_track_triggers_and_invocations() {
        let router = EventRouter::new();
        router.on("a", &Handler::new(|_| {}));
        router.trigger("a b", None, None);
        let stats = router.stats();
        assert_eq!(stats.triggered, 2);
        assert_eq!(stats.invocations, 1);
        assert_eq!(stats.active_subscriptions, 1);
    }
}
