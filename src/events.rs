//! Typed event channels for the observable session surfaces.
//!
//! Every externally observable mutation in this crate is published through
//! one of two primitives, regardless of which asynchronous task triggered
//! it:
//!
//! - [`EventChannel`]: ordered publish/subscribe. A subscriber created with
//!   [`EventChannel::subscribe`] receives every subsequent event in emission
//!   order; dropping the [`EventStream`] unsubscribes it.
//! - [`StateFlag`]: a current-value cell. Readers can sample the latest
//!   value or watch for changes; redundant writes of an equal value are not
//!   re-notified.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Default buffer size for event channels. Subscribers that fall further
/// behind than this skip ahead and a warning is logged.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Ordered publish/subscribe channel.
#[derive(Debug, Clone)]
pub struct EventChannel<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventChannel<T> {
    /// Create a channel with the default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Create a channel with an explicit buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Events emitted while no
    /// subscriber exists are dropped.
    pub fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all events emitted after this call.
    pub fn subscribe(&self) -> EventStream<T> {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of an [`EventChannel`]. Dropping the stream unsubscribes.
pub struct EventStream<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> EventStream<T> {
    /// Wait for the next event. Returns `None` once the channel is closed
    /// and all buffered events have been consumed.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged; skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next event if one is already buffered.
    pub fn try_next(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged; skipping ahead");
                }
                Err(_) => return None,
            }
        }
    }
}

/// A current-value cell with change notifications.
#[derive(Debug, Clone)]
pub struct StateFlag<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> StateFlag<T> {
    /// Create a flag holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(initial)),
        }
    }

    /// Sample the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value. Watchers are only notified when it actually
    /// changes.
    pub fn set(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Watch the value for changes.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}
