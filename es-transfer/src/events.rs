use std::pin::Pin;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{packet::PacketType, types::StreamType};

pub type StreamEventSender = broadcast::Sender<StreamEvent>;
pub type StreamEventReceiver = broadcast::Receiver<StreamEvent>;
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Notifications emitted by a transfer loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Starved relative to the playback clock (`true`) or flowing again.
    Buffering(bool),
    /// An incompatible configuration arrived; the controller must stop,
    /// push the stored configuration and start again.
    Reconfigure,
    /// The stream failed and will not recover on its own.
    PlaybackError(String),
    /// A packet of the given type left the loop. A terminating loop always
    /// reports `PacketProcessed(Eos)`.
    PacketProcessed(PacketType),
}

/// Broadcast fan-out of one stream's events.
///
/// `Buffering` is only sent when it differs from the previously sent value.
pub(crate) struct EventChannel {
    stream: StreamType,
    sender: StreamEventSender,
    buffering: Mutex<Option<bool>>,
}

impl EventChannel {
    pub fn new(stream: StreamType, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            stream,
            sender,
            buffering: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> StreamEventReceiver {
        self.sender.subscribe()
    }

    pub fn stream(&self) -> EventStream {
        let stream = self.stream;
        let events = BroadcastStream::new(self.sender.subscribe()).filter_map(move |r| async move {
            match r {
                Ok(event) => Some(event),
                Err(e) => {
                    log::warn!("{}: event subscriber lagging: {}", stream, e);
                    None
                }
            }
        });
        Box::pin(events)
    }

    pub fn buffering(&self, buffering: bool) {
        let mut last = self.buffering.lock();
        if *last == Some(buffering) {
            return;
        }
        *last = Some(buffering);
        log::debug!("{}: buffering {}", self.stream, buffering);
        // no subscribers is fine
        let _ = self.sender.send(StreamEvent::Buffering(buffering));
    }

    pub fn reconfigure(&self) {
        let _ = self.sender.send(StreamEvent::Reconfigure);
    }

    pub fn playback_error(&self, cause: impl Into<String>) {
        let _ = self.sender.send(StreamEvent::PlaybackError(cause.into()));
    }

    pub fn packet_processed(&self, packet_type: PacketType) {
        let _ = self.sender.send(StreamEvent::PacketProcessed(packet_type));
    }
}
