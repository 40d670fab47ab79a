//! Connection-change notifications.
//!
//! Every channel owns an [`EventHub`]. Events are published on the channel's
//! own read-loop thread; consumers that need a particular thread either
//! subscribe with a queue ([`EventHub::subscribe`], [`EventHub::attach`]) and
//! drain it where they like, or register a listener and re-dispatch
//! themselves.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Which link channel an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Low-rate control (CRI) channel.
    Control,
    /// High-rate position streaming channel.
    Streaming,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Control => write!(f, "CRI Client"),
            ChannelKind::Streaming => write!(f, "Position Client"),
        }
    }
}

/// A channel connected or disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Originating channel.
    pub channel: ChannelKind,
    /// New connection state.
    pub connected: bool,
}

/// Handle returned by [`EventHub::add_listener`].
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Fan-out point for one channel's connection events.
pub struct EventHub {
    channel: ChannelKind,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    queues: Mutex<Vec<Sender<ConnectionEvent>>>,
    next_id: AtomicU64,
}

impl EventHub {
    /// Create a hub for the given channel.
    pub fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            listeners: Mutex::new(Vec::new()),
            queues: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback, invoked on the channel's read-loop thread.
    ///
    /// The callback may call `stop()` on any channel, including its own.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a callback. Returns false if the id was unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Create a new queue receiving every future event.
    pub fn subscribe(&self) -> Receiver<ConnectionEvent> {
        let (tx, rx) = mpsc::channel();
        self.attach(tx);
        rx
    }

    /// Forward every future event into an existing queue.
    ///
    /// The sender is dropped once its receiver is gone.
    pub fn attach(&self, tx: Sender<ConnectionEvent>) {
        self.queues.lock().push(tx);
    }

    /// Publish a state change.
    pub(crate) fn notify(&self, connected: bool) {
        let event = ConnectionEvent {
            channel: self.channel,
            connected,
        };

        self.queues.lock().retain(|tx| tx.send(event).is_ok());

        // Listeners run without the lock so they may (un)register.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribers_receive_events_in_order() {
        let hub = EventHub::new(ChannelKind::Control);
        let rx = hub.subscribe();
        hub.notify(true);
        hub.notify(false);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ConnectionEvent { channel: ChannelKind::Control, connected: true },
                ConnectionEvent { channel: ChannelKind::Control, connected: false },
            ]
        );
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let hub = EventHub::new(ChannelKind::Streaming);
        drop(hub.subscribe());
        hub.notify(true);
        assert!(hub.queues.lock().is_empty());
    }

    #[test]
    fn test_listener_add_remove() {
        let hub = EventHub::new(ChannelKind::Streaming);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = hub.add_listener(move |ev| {
            assert_eq!(ev.channel, ChannelKind::Streaming);
            c.fetch_add(1, Ordering::SeqCst);
        });

        hub.notify(true);
        assert!(hub.remove_listener(id));
        assert!(!hub.remove_listener(id));
        hub.notify(false);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
