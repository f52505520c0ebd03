//! Per-stream transfer engine.
//!
//! An [`EsStream`] drains one stream's queue in [`PacketStorage`] into the
//! attached [`EsSink`] from a background tokio task: it decrypts encrypted
//! packets, retries submissions the sink pushes back on, paces itself
//! against the other streams through the [`Synchronizer`], and reports what
//! happens as [`StreamEvent`](crate::events::StreamEvent)s.

use std::any::Any;
use std::fmt::{Display, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::PlayerClock,
    config::StreamConfig,
    drm::{DrmError, DrmSession},
    error::{EsError, Result},
    events::{EventChannel, EventStream, StreamEventReceiver},
    packet::{Packet, PacketKind, PacketType},
    settings::TransferSettings,
    sink::{EsSink, submit_with_retry},
    storage::PacketStorage,
    sync::Synchronizer,
    types::{Pts, StreamType},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No configuration pushed to the current sink.
    Unconfigured,
    Configured,
    Transferring,
    /// The last transfer ended through stop, end of stream or EOS.
    Stopped,
    /// The last transfer failed; [`EsStream::reset`] is required.
    Faulted,
}

impl Display for EngineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// State owned by the transfer loop. The loop holds the lock for as long as
/// it runs, so nothing else touches the in-flight packet meanwhile.
#[derive(Default)]
struct TransferState {
    current_packet: Option<Packet>,
}

struct StreamShared {
    stream: StreamType,
    storage: Arc<PacketStorage>,
    synchronizer: Arc<Synchronizer>,
    clock: PlayerClock,
    settings: TransferSettings,
    events: EventChannel,
    player: RwLock<Option<Arc<dyn EsSink>>>,
    configuration: Mutex<Option<StreamConfig>>,
    is_configured: AtomicBool,
    state: Mutex<EngineState>,
    current_pts: AtomicI64,
    transfer: tokio::sync::Mutex<TransferState>,
}

/// Tokens of the most recent loop. `finished` is cancelled by a drop guard
/// owned by the spawned task, so it fires once the task is gone, whichever
/// way it ended.
#[derive(Default)]
struct ActiveTransfer {
    cancel: Option<CancellationToken>,
    finished: Option<CancellationToken>,
}

impl ActiveTransfer {
    fn is_running(&self) -> bool {
        self.finished.as_ref().is_some_and(|f| !f.is_cancelled())
    }
}

pub struct EsStream {
    shared: Arc<StreamShared>,
    active: Mutex<ActiveTransfer>,
}

impl EsStream {
    /// Create the engine for `stream`. The stream's storage queue is not
    /// touched; the owner initializes it.
    pub fn new(
        stream: StreamType,
        storage: Arc<PacketStorage>,
        synchronizer: Arc<Synchronizer>,
        clock: PlayerClock,
        settings: TransferSettings,
    ) -> Self {
        synchronizer.initialize(stream);
        let events = EventChannel::new(stream, settings.event_capacity);

        Self {
            shared: Arc::new(StreamShared {
                stream,
                storage,
                synchronizer,
                clock,
                settings,
                events,
                player: RwLock::new(None),
                configuration: Mutex::new(None),
                is_configured: AtomicBool::new(false),
                state: Mutex::new(EngineState::Unconfigured),
                current_pts: AtomicI64::new(Pts::ZERO.as_micros()),
                transfer: tokio::sync::Mutex::new(TransferState::default()),
            }),
            active: Mutex::new(ActiveTransfer::default()),
        }
    }

    pub fn stream_type(&self) -> StreamType {
        self.shared.stream
    }

    /// Attach a new sink. It has to be configured again before transfer.
    pub fn set_player(&self, player: Arc<dyn EsSink>) {
        log::info!("{}: player set", self.shared.stream);
        *self.shared.player.write() = Some(player);
        self.shared.is_configured.store(false, Ordering::Release);

        let mut state = self.shared.state.lock();
        if matches!(*state, EngineState::Configured | EngineState::Stopped) {
            *state = EngineState::Unconfigured;
        }
    }

    /// Remember `config` without pushing it to the sink.
    pub fn store_configuration(&self, config: StreamConfig) {
        log::info!("{}: configuration stored", self.shared.stream);
        *self.shared.configuration.lock() = Some(config);
    }

    /// Push `config`, or the stored configuration when `None`, to the sink.
    pub fn push_configuration(&self, config: Option<StreamConfig>) -> Result<()> {
        let stream = self.shared.stream;
        log::info!(
            "{}: using {} configuration",
            stream,
            if config.is_some() { "provided" } else { "stored" }
        );

        let config = {
            let mut stored = self.shared.configuration.lock();
            if let Some(config) = config {
                *stored = Some(config);
            }
            stored.clone().ok_or(EsError::NoConfiguration(stream))?
        };

        let player = self.shared.player()?;
        log::info!("{}: {}", stream, config);
        player.set_stream(&config).map_err(EsError::Sink)?;

        self.shared.is_configured.store(true, Ordering::Release);
        let mut state = self.shared.state.lock();
        if *state == EngineState::Unconfigured {
            *state = EngineState::Configured;
        }
        log::info!("{}: stream configuration set", stream);
        Ok(())
    }

    /// Start the transfer loop. A no-op when one is already running.
    ///
    /// The loop runs under a child of `token`, so cancelling either `token`
    /// or calling [`EsStream::stop`] ends it.
    pub fn start(&self, token: &CancellationToken) -> Result<()> {
        let stream = self.shared.stream;
        let mut active = self.active.lock();

        if active.is_running() {
            log::info!("{}: already running", stream);
            return Ok(());
        }
        if self.state() == EngineState::Faulted {
            return Err(EsError::Faulted(stream));
        }
        if !self.is_configured() {
            return Err(EsError::NotConfigured(stream));
        }

        log::info!("{}: starting transfer", stream);
        let cancel = token.child_token();
        self.shared.set_state(EngineState::Transferring);

        let finished = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let loop_cancel = cancel.clone();
        let done = finished.clone().drop_guard();
        tokio::spawn(async move {
            let _done = done;
            shared.transfer_task(loop_cancel).await;
        });
        active.cancel = Some(cancel);
        active.finished = Some(finished);
        Ok(())
    }

    /// Request the loop to stop. Does not wait; see
    /// [`EsStream::wait_finished`].
    pub fn stop(&self) {
        log::info!("{}: stopping transfer", self.shared.stream);
        if let Some(cancel) = self.active.lock().cancel.as_ref() {
            cancel.cancel();
        }
    }

    /// Resolves once the current loop, if any, has terminated.
    pub async fn wait_finished(&self) {
        let finished = self.active.lock().finished.clone();
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_running()
    }

    pub fn disable_input(&self) {
        self.shared.storage.disable(self.shared.stream);
    }

    pub fn enable_input(&self) {
        self.shared.storage.enable(self.shared.stream);
    }

    /// Close input, drop everything buffered and the in-flight packet.
    ///
    /// A running loop is stopped first, since it owns the in-flight packet.
    pub async fn empty_storage(&self) {
        let stream = self.shared.stream;
        self.shared.storage.disable(stream);
        self.shared.storage.empty(stream);

        if self.is_running() {
            self.stop();
            self.wait_finished().await;
        }

        let in_flight = self.shared.transfer.lock().await.current_packet.take();
        if let Some(packet) = in_flight {
            log::info!("{}: releasing in-flight {}", stream, packet.packet_type());
        }
    }

    /// Leave the faulted (or any idle) state: drop the in-flight packet and
    /// give the stream a fresh storage queue.
    pub async fn reset(&self) -> Result<()> {
        let stream = self.shared.stream;
        if self.is_running() {
            return Err(EsError::Busy(stream));
        }

        log::info!("{}: reset from {}", stream, self.state());
        self.shared.transfer.lock().await.current_packet = None;
        self.shared.storage.initialize(stream);
        self.shared.synchronizer.initialize(stream);
        self.shared.set_state(self.shared.idle_state());
        Ok(())
    }

    pub fn subscribe(&self) -> StreamEventReceiver {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> EventStream {
        self.shared.events.stream()
    }

    pub fn configuration(&self) -> Option<StreamConfig> {
        self.shared.configuration.lock().clone()
    }

    pub fn has_configuration(&self) -> bool {
        self.shared.configuration.lock().is_some()
    }

    pub fn is_configured(&self) -> bool {
        self.shared.is_configured.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    /// Pts of the last packet that started processing.
    pub fn current_pts(&self) -> Pts {
        self.shared.current_pts()
    }
}

impl Drop for EsStream {
    fn drop(&mut self) {
        self.disable_input();
        self.stop();
    }
}

impl StreamShared {
    fn player(&self) -> Result<Arc<dyn EsSink>> {
        self.player
            .read()
            .clone()
            .ok_or(EsError::NoPlayer(self.stream))
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
    }

    fn idle_state(&self) -> EngineState {
        if self.is_configured.load(Ordering::Acquire) {
            EngineState::Configured
        } else {
            EngineState::Unconfigured
        }
    }

    fn idle_state_after_run(&self) -> EngineState {
        if self.is_configured.load(Ordering::Acquire) {
            EngineState::Stopped
        } else {
            EngineState::Unconfigured
        }
    }

    fn current_pts(&self) -> Pts {
        Pts::from_micros(self.current_pts.load(Ordering::Acquire))
    }

    fn set_current_pts(&self, pts: Pts) {
        if !pts.is_sentinel() {
            self.current_pts.store(pts.as_micros(), Ordering::Release);
        }
    }

    async fn transfer_task(self: Arc<Self>, cancel: CancellationToken) {
        let stream = self.stream;
        log::info!("{}: transfer started", stream);

        let mut transfer = self.transfer.lock().await;
        let result = AssertUnwindSafe(self.transfer_loop(&mut transfer, &cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(EsError::Panicked(panic_message(panic.as_ref()))));
        drop(transfer);

        let (next_state, failure) = match result {
            Ok(()) => {
                log::info!("{}: transfer completed", stream);
                (self.idle_state_after_run(), None)
            }
            Err(e) if e.is_benign() => {
                log::info!("{}: transfer ended: {}", stream, e);
                (EngineState::Stopped, None)
            }
            Err(e) => {
                log::error!("{}: transfer failed: {}", stream, e);
                self.storage.disable(stream);
                (EngineState::Faulted, Some(e.to_string()))
            }
        };

        self.set_state(next_state);
        if let Some(cause) = failure {
            self.events.playback_error(cause);
        }
        self.synchronizer.deactivate(stream);
        self.events.packet_processed(PacketType::Eos);
        self.events.buffering(false);
        log::info!("{}: transfer terminated ({})", stream, next_state);
    }

    async fn transfer_loop(
        &self,
        transfer: &mut TransferState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(EsError::Cancelled);
            }
            if !self.process_next_packet(transfer, cancel).await? {
                return Ok(());
            }
            self.synchronizer.synchronize(self.stream, cancel).await?;
        }
    }

    /// Returns whether the loop should go on.
    async fn process_next_packet(
        &self,
        transfer: &mut TransferState,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let packet = match transfer.current_packet.take() {
            Some(packet) => packet,
            None => self.next_packet(cancel).await?,
        };
        let packet = transfer.current_packet.insert(packet);

        let keep_going = self.process_packet(packet, cancel).await?;

        if let Some(packet) = transfer.current_packet.take() {
            self.synchronizer.data_out(&packet);
            let packet_type = packet.packet_type();
            drop(packet);
            self.events.packet_processed(packet_type);
        }
        Ok(keep_going)
    }

    async fn next_packet(&self, cancel: &CancellationToken) -> Result<Packet> {
        let starving = self.storage.count(self.stream) == 0
            && self.clock.last().abs_diff(self.current_pts())
                <= self.settings.buffering_threshold();
        self.events.buffering(starving);

        let packet = self.storage.get_packet(self.stream, cancel).await?;
        self.set_current_pts(packet.pts());
        Ok(packet)
    }

    async fn process_packet(&self, packet: &Packet, cancel: &CancellationToken) -> Result<bool> {
        match packet.kind() {
            PacketKind::Eos => {
                self.push_eos(packet, cancel).await?;
                Ok(false)
            }
            PacketKind::ConfigChange(config) => Ok(self.apply_config_change(config)),
            PacketKind::Encrypted { session, .. } => {
                self.push_encrypted(packet, session.as_ref(), cancel).await?;
                self.set_current_pts(packet.pts());
                Ok(true)
            }
            PacketKind::Data(_) => {
                let player = self.player()?;
                submit_with_retry(player.as_ref(), packet, &self.settings, cancel).await?;
                self.set_current_pts(packet.pts());
                Ok(true)
            }
        }
    }

    async fn push_eos(&self, packet: &Packet, cancel: &CancellationToken) -> Result<()> {
        log::info!("{}: pushing EOS", self.stream);
        let player = self.player()?;
        submit_with_retry(player.as_ref(), packet, &self.settings, cancel).await
    }

    async fn push_encrypted(
        &self,
        packet: &Packet,
        session: &dyn DrmSession,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !session.can_decrypt() {
            self.events.buffering(true);
            tokio::select! {
                _ = cancel.cancelled() => return Err(EsError::Cancelled),
                ready = session.wait_for_ready(cancel) => drm_result(ready)?,
            }
            self.events.buffering(false);
            log::info!("{}: DRM initialization complete", self.stream);
        }

        let decrypted = tokio::select! {
            _ = cancel.cancelled() => return Err(EsError::Cancelled),
            decrypted = session.decrypt(packet, cancel) => drm_result(decrypted)?,
        };

        let player = self.player()?;
        submit_with_retry(player.as_ref(), &decrypted, &self.settings, cancel).await
    }

    /// Adopt an in-band configuration. An audio change the sink cannot
    /// follow stops the loop and asks the controller to reconfigure.
    fn apply_config_change(&self, config: &StreamConfig) -> bool {
        let mut current = self.configuration.lock();
        let incompatible = current
            .as_ref()
            .is_some_and(|c| c.stream_type() == StreamType::Audio && !c.is_compatible(config));
        *current = Some(config.clone());
        drop(current);

        if !incompatible {
            log::info!("{}: configuration change adopted", self.stream);
            return true;
        }

        log::warn!("{}: incompatible stream config change", self.stream);
        self.is_configured.store(false, Ordering::Release);
        self.events.reconfigure();
        false
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn drm_result<T>(result: std::result::Result<T, DrmError>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(DrmError::Cancelled) => Err(EsError::Cancelled),
        Err(e) => Err(EsError::Drm(e)),
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;
