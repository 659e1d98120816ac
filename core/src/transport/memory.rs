// In-process host environment: windows exchanging strings through a hub
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};

use super::{InboundHandler, InboundMessage, ListenerId, PeerHandle, TargetScope, Transport};
use crate::{BusError, Result};

/// Messages a window holds before further posts to it are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct WindowState {
    peer: PeerHandle,
    origin: String,
    inbox_tx: mpsc::Sender<InboundMessage>,
    inbox_rx: AsyncMutex<mpsc::Receiver<InboundMessage>>,
    listeners: Mutex<Vec<(ListenerId, InboundHandler)>>,
    next_listener: AtomicU64,
    dropped: AtomicU64,
    stop: Notify,
    closed: AtomicBool,
}

/// Registry of every open window; routes posts by target peer.
pub struct MemoryHub {
    windows: DashMap<u64, Arc<WindowState>>,
    queue_capacity: usize,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self {
            windows: DashMap::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hub whose windows queue at most `queue_capacity` undelivered messages.
    pub fn with_capacity(queue_capacity: usize) -> Result<Arc<Self>> {
        if queue_capacity == 0 {
            return Err(BusError::InvalidConfig(
                "window queue capacity must be at least 1".into(),
            ));
        }
        Ok(Arc::new(Self {
            windows: DashMap::new(),
            queue_capacity,
        }))
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Opens a window at `origin` and registers it with the hub.
    pub fn open_window(
        self: &Arc<Self>,
        label: impl Into<String>,
        origin: impl Into<String>,
    ) -> MemoryWindow {
        let (inbox_tx, inbox_rx) = mpsc::channel(self.queue_capacity);
        let state = Arc::new(WindowState {
            peer: PeerHandle::new(label),
            origin: origin.into(),
            inbox_tx,
            inbox_rx: AsyncMutex::new(inbox_rx),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            stop: Notify::new(),
            closed: AtomicBool::new(false),
        });
        self.windows.insert(state.peer.id(), Arc::clone(&state));
        info!(
            window = %state.peer.label(),
            origin = %state.origin,
            capacity = self.queue_capacity,
            "Opened window"
        );
        MemoryWindow {
            hub: Arc::clone(self),
            state,
        }
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    fn lookup(&self, peer: &PeerHandle) -> Option<Arc<WindowState>> {
        self.windows
            .get(&peer.id())
            .map(|w| Arc::clone(w.value()))
            .filter(|w| w.peer == *peer)
    }
}

/// One execution context attached to a [`MemoryHub`].
///
/// Posted messages are queued on the target window and delivered, one at a
/// time and in arrival order, to every listener of that window. The queue
/// is bounded by the hub's capacity; posts to a full window are dropped
/// with a warning. Delivery is either explicit ([`pump`](Self::pump)) or
/// driven by the async [`run`](Self::run) loop; use one or the other for a
/// window.
#[derive(Clone)]
pub struct MemoryWindow {
    hub: Arc<MemoryHub>,
    state: Arc<WindowState>,
}

impl MemoryWindow {
    /// Handle other windows use to address this one.
    pub fn peer(&self) -> PeerHandle {
        self.state.peer.clone()
    }

    pub fn origin(&self) -> &str {
        &self.state.origin
    }

    /// Messages queued for delivery.
    pub fn pending(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let tx = &self.state.inbox_tx;
        tx.max_capacity() - tx.capacity()
    }

    /// Posts dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state.listeners).len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn deliver(&self, message: &InboundMessage) {
        // Listeners may (un)register while we deliver
        let listeners: Vec<InboundHandler> = lock(&self.state.listeners)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for listener in &listeners {
            listener(message);
        }
    }

    /// Delivers queued messages until the queue is empty.
    ///
    /// Messages posted by listeners during the drain are delivered in the
    /// same call. Returns the number of messages delivered; 0 while the
    /// [`run`](Self::run) loop owns the queue or after shutdown.
    pub fn pump(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let Ok(mut inbox) = self.state.inbox_rx.try_lock() else {
            debug!(window = %self.state.peer.label(), "Queue busy; pump skipped");
            return 0;
        };
        let mut delivered = 0;
        while let Ok(message) = inbox.try_recv() {
            self.deliver(&message);
            delivered += 1;
        }
        if delivered > 0 {
            debug!(window = %self.state.peer.label(), delivered, "Pumped messages");
        }
        delivered
    }

    /// Delivers messages as they arrive, until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        let mut inbox = self.state.inbox_rx.lock().await;
        while !self.is_closed() {
            tokio::select! {
                biased;
                _ = self.state.stop.notified() => break,
                received = inbox.recv() => match received {
                    Some(message) => self.deliver(&message),
                    None => break,
                },
            }
        }
        inbox.close();
        while inbox.try_recv().is_ok() {}
        debug!(window = %self.state.peer.label(), "Delivery loop stopped");
    }

    /// Detaches the window from the hub and stops its delivery loop.
    ///
    /// Messages already queued are discarded; later posts to it fail.
    pub fn shutdown(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.hub.windows.remove(&self.state.peer.id());
        // A running loop holds the receiver and drains it on exit
        if let Ok(mut inbox) = self.state.inbox_rx.try_lock() {
            inbox.close();
            while inbox.try_recv().is_ok() {}
        }
        self.state.stop.notify_one();
        info!(window = %self.state.peer.label(), "Window shut down");
    }
}

impl Transport for MemoryWindow {
    fn post(&self, message: String, target: &PeerHandle, scope: &TargetScope) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::Transport(format!(
                "window '{}' is shut down",
                self.state.peer.label()
            )));
        }
        let Some(window) = self.hub.lookup(target) else {
            warn!(target_peer = %target.label(), "Post to unknown window");
            return Err(BusError::Transport(format!(
                "no open window for peer '{}'",
                target.label()
            )));
        };
        if !scope.permits(&window.origin) {
            // Hosts drop scope mismatches without telling the sender
            warn!(
                target_peer = %target.label(),
                target_origin = %window.origin,
                scope = %scope,
                "Target origin does not match scope; message dropped"
            );
            return Ok(());
        }
        let message = InboundMessage {
            source: self.state.peer.clone(),
            origin: self.state.origin.clone(),
            payload: message,
        };
        match window.inbox_tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                window.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target_peer = %target.label(),
                    capacity = window.inbox_tx.max_capacity(),
                    "Target queue full; message dropped"
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(BusError::Transport(format!(
                "window '{}' is shut down",
                target.label()
            ))),
        }
    }

    fn listen(&self, handler: InboundHandler) -> ListenerId {
        let id = ListenerId(self.state.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.state.listeners).push((id, handler));
        id
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.state.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}
