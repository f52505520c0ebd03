//! Per-stream packet queues between the feeder and the transfer loops.
//!
//! Each stream has one unbounded FIFO. Writes can be closed with
//! [`PacketStorage::disable`]; a closed queue still hands out what it holds
//! and then reports end of stream. Closing is final for that queue:
//! [`PacketStorage::enable`] and [`PacketStorage::initialize`] replace it with
//! a fresh one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{EsError, Result},
    packet::Packet,
    types::{Pts, StreamType},
};

/// Result of [`PacketStorage::add_packet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    /// The stream's queue is closed; the packet was released. Feeders
    /// should stop producing for this stream.
    Stopped,
}

struct QueueState {
    packets: VecDeque<Packet>,
    accepting: bool,
    pts_in: Pts,
    pts_out: Pts,
}

struct PacketQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PacketQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                accepting: true,
                pts_in: Pts::ZERO,
                pts_out: Pts::ZERO,
            }),
            notify: Notify::new(),
        }
    }

    /// Close for writes and take everything buffered.
    fn close_and_drain(&self) -> VecDeque<Packet> {
        let drained = {
            let mut state = self.state.lock();
            state.accepting = false;
            std::mem::take(&mut state.packets)
        };
        self.notify.notify_one();
        drained
    }
}

pub struct PacketStorage {
    queues: [Mutex<Option<Arc<PacketQueue>>>; StreamType::COUNT],
    disposed: AtomicBool,
}

impl PacketStorage {
    pub fn new() -> Self {
        Self {
            queues: std::array::from_fn(|_| Mutex::new(None)),
            disposed: AtomicBool::new(false),
        }
    }

    /// Install a fresh, open queue for `stream`. Packets left in the
    /// previous queue are released and a reader blocked on it sees end of
    /// stream.
    pub fn initialize(&self, stream: StreamType) {
        if self.disposed.load(Ordering::Acquire) {
            log::warn!("{}: storage disposed, not initializing", stream);
            return;
        }
        log::info!("{}: initializing storage", stream);

        let previous = self.queues[stream.index()]
            .lock()
            .replace(Arc::new(PacketQueue::new()));

        if let Some(previous) = previous {
            release_all(stream, previous.close_and_drain());
        }
    }

    /// Append `packet` to its stream's queue.
    pub fn add_packet(&self, packet: Packet) -> Enqueue {
        let stream = packet.stream();
        let Some(queue) = self.queue(stream) else {
            log::warn!("{}: packet storage is stopped", stream);
            return Enqueue::Stopped;
        };

        let rejected = {
            let mut state = queue.state.lock();
            if state.accepting {
                if !packet.pts().is_sentinel() {
                    state.pts_in = packet.pts();
                }
                state.packets.push_back(packet);
                None
            } else {
                Some(packet)
            }
        };

        match rejected {
            None => {
                queue.notify.notify_one();
                Enqueue::Accepted
            }
            Some(packet) => {
                log::warn!("{}: packet storage is stopped", stream);
                drop(packet);
                Enqueue::Stopped
            }
        }
    }

    /// Take the next packet of `stream`, waiting while the queue is empty and
    /// still open.
    pub async fn get_packet(&self, stream: StreamType, cancel: &CancellationToken) -> Result<Packet> {
        let queue = self.queue(stream).ok_or(EsError::EndOfStream(stream))?;

        loop {
            if cancel.is_cancelled() {
                return Err(EsError::Cancelled);
            }

            let notified = queue.notify.notified();
            {
                let mut state = queue.state.lock();
                if let Some(packet) = state.packets.pop_front() {
                    if !packet.pts().is_sentinel() {
                        state.pts_out = packet.pts();
                    }
                    return Ok(packet);
                }
                if !state.accepting {
                    return Err(EsError::EndOfStream(stream));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(EsError::Cancelled),
                _ = notified => {}
            }
        }
    }

    pub fn count(&self, stream: StreamType) -> usize {
        self.queue(stream)
            .map(|q| q.state.lock().packets.len())
            .unwrap_or(0)
    }

    /// Buffered presentation time, `pts_in - pts_out` clamped at zero since
    /// pts order within a stream is not guaranteed.
    pub fn duration(&self, stream: StreamType) -> Duration {
        self.queue(stream)
            .map(|q| {
                let state = q.state.lock();
                state.pts_in.saturating_sub(state.pts_out).to_duration()
            })
            .unwrap_or_default()
    }

    /// Last real pts added to `stream`.
    pub fn pts_in(&self, stream: StreamType) -> Pts {
        self.queue(stream)
            .map(|q| q.state.lock().pts_in)
            .unwrap_or_default()
    }

    /// Last real pts taken from `stream`.
    pub fn pts_out(&self, stream: StreamType) -> Pts {
        self.queue(stream)
            .map(|q| q.state.lock().pts_out)
            .unwrap_or_default()
    }

    pub fn is_accepting(&self, stream: StreamType) -> bool {
        self.queue(stream)
            .map(|q| q.state.lock().accepting)
            .unwrap_or(false)
    }

    /// Close `stream` for writes. Buffered packets stay readable.
    pub fn disable(&self, stream: StreamType) {
        let Some(queue) = self.queue(stream) else {
            return;
        };
        let was_accepting = std::mem::replace(&mut queue.state.lock().accepting, false);
        if was_accepting {
            log::info!("{}: storage input disabled", stream);
        }
        queue.notify.notify_one();
    }

    /// Reopen `stream` for writes. A closed queue is never reopened in
    /// place; it is replaced by a fresh one (releasing its leftovers).
    pub fn enable(&self, stream: StreamType) {
        if self.is_accepting(stream) {
            return;
        }
        self.initialize(stream);
    }

    /// Release everything buffered for `stream` without closing it.
    pub fn empty(&self, stream: StreamType) {
        let Some(queue) = self.queue(stream) else {
            return;
        };
        let drained = std::mem::take(&mut queue.state.lock().packets);
        release_all(stream, drained);
    }

    /// Release every queue and every buffered packet. Later writes report
    /// [`Enqueue::Stopped`]. Idempotent.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);

        for stream in StreamType::ALL {
            let queue = self.queues[stream.index()].lock().take();
            if let Some(queue) = queue {
                release_all(stream, queue.close_and_drain());
                log::info!("{}: storage disposed", stream);
            }
        }
    }

    fn queue(&self, stream: StreamType) -> Option<Arc<PacketQueue>> {
        self.queues[stream.index()].lock().clone()
    }
}

impl Default for PacketStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PacketStorage {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn release_all(stream: StreamType, packets: VecDeque<Packet>) {
    if packets.is_empty() {
        return;
    }
    log::info!("{}: disposing of {} packets", stream, packets.len());
    drop(packets);
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;
