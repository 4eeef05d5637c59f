//! Message bridge.
//!
//! The single outbound path to the host. One sink slot: attaching a sink
//! replaces the previous one, and with no sink attached messages are
//! dropped. Nothing is buffered.
//!
//! The bridge also carries the session epoch. Every transport callback is
//! tagged with the epoch it was created in, and deliveries from an older
//! epoch are discarded. The epoch check and the hand-off to the sink happen
//! under one read guard, so once [`MessageBridge::advance_epoch`] returns no
//! message from an older epoch can reach the host. Sinks must not call back
//! into the bridge.

use bridge_protocol::{codec, StreamMessage};
use parking_lot::RwLock;
use pusher_bridge_transport::TransportEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Receives encoded stream messages.
pub trait EventSink: Send + Sync {
    /// Deliver one encoded message.
    ///
    /// Returns `false` if the receiving side is gone.
    fn send(&self, message: String) -> bool;
}

impl<F> EventSink for F
where
    F: Fn(String) + Send + Sync,
{
    fn send(&self, message: String) -> bool {
        self(message);
        true
    }
}

/// Sink that forwards into an unbounded channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<String>,
}

impl EventSink for ChannelSink {
    fn send(&self, message: String) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Create a sink paired with the receiving end of its channel.
#[must_use]
pub fn channel_sink() -> (ChannelSink, mpsc::UnboundedReceiver<String>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelSink { sender }, receiver)
}

/// Build the stream message for a transport event.
///
/// A missing channel or payload becomes an empty string.
#[must_use]
pub fn event_message(event: TransportEvent) -> StreamMessage {
    StreamMessage::event(
        event.channel_name.unwrap_or_default(),
        event.event_name,
        event.data.unwrap_or_default(),
    )
}

/// Identifies one attached sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Messages handed to a sink.
    pub delivered: u64,
    /// Messages dropped because no sink was attached or its receiver was gone.
    pub unattended: u64,
    /// Messages dropped because they came from a previous session.
    pub stale: u64,
    /// Messages dropped because they failed to encode.
    pub failed: u64,
}

/// The outbound sink slot.
#[derive(Default)]
pub struct MessageBridge {
    sink: RwLock<Option<(SinkId, Arc<dyn EventSink>)>>,
    next_sink: AtomicU64,
    epoch: RwLock<u64>,
    logging: AtomicBool,
    delivered: AtomicU64,
    unattended: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

impl MessageBridge {
    /// Create a bridge with no sink attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink, replacing any previous one.
    pub fn attach(&self, sink: impl EventSink + 'static) -> SinkId {
        self.attach_shared(Arc::new(sink))
    }

    /// Attach a shared sink, replacing any previous one.
    pub fn attach_shared(&self, sink: Arc<dyn EventSink>) -> SinkId {
        let id = SinkId(self.next_sink.fetch_add(1, Ordering::Relaxed));
        *self.sink.write() = Some((id, sink));
        trace!(sink = id.0, "Sink attached");
        id
    }

    /// Clear the sink slot.
    pub fn detach(&self) {
        *self.sink.write() = None;
        trace!("Sink detached");
    }

    /// Clear the sink slot if `id` is still the attached sink.
    ///
    /// Returns `true` if the slot was cleared.
    pub fn detach_if(&self, id: SinkId) -> bool {
        let mut slot = self.sink.write();
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
            trace!(sink = id.0, "Sink detached");
            true
        } else {
            false
        }
    }

    /// Check if a sink is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.sink.read().is_some()
    }

    /// Enable or disable the log side channel.
    pub fn set_logging(&self, enabled: bool) {
        self.logging.store(enabled, Ordering::Relaxed);
    }

    /// Whether the log side channel is enabled.
    #[must_use]
    pub fn logging_enabled(&self) -> bool {
        self.logging.load(Ordering::Relaxed)
    }

    /// Current session epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        *self.epoch.read()
    }

    /// Start a new session epoch, returning it.
    ///
    /// Waits for deliveries already past their epoch check to finish.
    pub fn advance_epoch(&self) -> u64 {
        let mut epoch = self.epoch.write();
        *epoch += 1;
        *epoch
    }

    /// Deliver a message on behalf of the session started at `epoch`.
    ///
    /// Returns `true` if a sink received it.
    pub fn deliver_from(&self, epoch: u64, message: &StreamMessage) -> bool {
        let Some(encoded) = self.encode(message) else {
            return false;
        };

        let current = self.epoch.read();
        if *current != epoch {
            self.stale.fetch_add(1, Ordering::Relaxed);
            trace!(epoch, kind = message.kind(), "Dropped message from previous session");
            return false;
        }
        let delivered = self.hand_off(encoded, message);
        drop(current);
        delivered
    }

    /// Encode a message and hand it to the current sink.
    ///
    /// Returns `true` if a sink received it.
    pub fn deliver(&self, message: &StreamMessage) -> bool {
        match self.encode(message) {
            Some(encoded) => self.hand_off(encoded, message),
            None => false,
        }
    }

    fn encode(&self, message: &StreamMessage) -> Option<String> {
        match codec::encode(message) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                if self.logging_enabled() {
                    warn!(kind = message.kind(), error = %e, "Failed to encode stream message");
                }
                None
            }
        }
    }

    fn hand_off(&self, encoded: String, message: &StreamMessage) -> bool {
        // Clone out of the slot so the sink runs without the slot lock held.
        let sink = self.sink.read().as_ref().map(|(_, sink)| Arc::clone(sink));
        if sink.is_some_and(|sink| sink.send(encoded)) {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            if self.logging_enabled() {
                trace!(kind = message.kind(), "Delivered stream message");
            }
            true
        } else {
            self.unattended.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            unattended: self.unattended.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
