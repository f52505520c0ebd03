//! Presentation-time pacing between streams.
//!
//! Each stream publishes the pts of the last packet it handed to the sink.
//! A stream that gets further ahead of the slowest other active stream than
//! the tolerance waits in [`Synchronizer::synchronize`] until the gap closes.
//! The table is a `watch` channel, so a waiter re-checks on every update of
//! any slot. Values may be stale by one update; pacing is approximate.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{EsError, Result},
    packet::Packet,
    types::{Pts, StreamType},
};

#[derive(Clone, Copy, Debug, Default)]
struct SyncSlot {
    pts: Option<Pts>,
    active: bool,
}

#[derive(Clone, Debug, Default)]
struct SyncState {
    slots: [SyncSlot; StreamType::COUNT],
}

impl SyncState {
    /// Lowest pts among the other active streams.
    fn reference(&self, stream: StreamType) -> Option<Pts> {
        StreamType::ALL
            .into_iter()
            .filter(|other| *other != stream)
            .map(|other| self.slots[other.index()])
            .filter(|slot| slot.active)
            .filter_map(|slot| slot.pts)
            .min()
    }

    fn is_ahead(&self, stream: StreamType, tolerance: Duration) -> bool {
        let Some(own) = self.slots[stream.index()].pts else {
            return false;
        };
        match self.reference(stream) {
            Some(reference) => own.saturating_sub(reference) > Pts::from_duration(tolerance),
            None => false,
        }
    }
}

pub struct Synchronizer {
    state: watch::Sender<SyncState>,
    tolerance: Duration,
}

impl Synchronizer {
    pub fn new(tolerance: Duration) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self { state, tolerance }
    }

    /// Forget everything recorded for `stream`.
    pub fn initialize(&self, stream: StreamType) {
        self.state.send_modify(|state| {
            state.slots[stream.index()] = SyncSlot::default();
        });
    }

    /// Record that `packet` left the pipeline. EOS takes the stream out of
    /// pacing so its siblings never wait on it.
    pub fn data_out(&self, packet: &Packet) {
        let stream = packet.stream();
        if packet.is_eos() {
            self.deactivate(stream);
            return;
        }
        if packet.pts().is_sentinel() {
            return;
        }
        self.state.send_modify(|state| {
            let slot = &mut state.slots[stream.index()];
            slot.pts = Some(packet.pts());
            slot.active = true;
        });
    }

    /// Stop pacing others against `stream` until it delivers again.
    pub fn deactivate(&self, stream: StreamType) {
        self.state.send_if_modified(|state| {
            let slot = &mut state.slots[stream.index()];
            std::mem::replace(&mut slot.active, false)
        });
    }

    pub fn last_pts(&self, stream: StreamType) -> Option<Pts> {
        self.state.borrow().slots[stream.index()].pts
    }

    /// Wait until `stream` is within tolerance of the slowest other active
    /// stream. Returns at once when it already is, or when it is alone.
    pub async fn synchronize(&self, stream: StreamType, cancel: &CancellationToken) -> Result<()> {
        let tolerance = self.tolerance;
        let mut state = self.state.subscribe();

        {
            let current = state.borrow_and_update();
            if !current.is_ahead(stream, tolerance) {
                return Ok(());
            }
            log::debug!(
                "{}: ahead of {:?} by more than {:?}, waiting",
                stream,
                current.reference(stream),
                tolerance
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(EsError::Cancelled),
            caught_up = state.wait_for(|s| !s.is_ahead(stream, tolerance)) => {
                caught_up.map(|_| ()).map_err(|_| EsError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;
