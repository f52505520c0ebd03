//! Stand-ins for the platform pieces: a hardware sink that pushes back now
//! and then, a DRM session that needs a license first, and a demuxer that
//! produces synthetic access units.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use es_transfer::{
    AudioConfig, DrmError, DrmSession, Enqueue, EsSink, Packet, PacketStorage, PlayerClock, Pts,
    StreamConfig, StreamType, SubmitStatus, VideoConfig,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::DemoConfig;

// the feeder pauses while a queue holds more than this
const MAX_BUFFERED: Duration = Duration::from_secs(2);
const KEY: u8 = 0x5a;

pub fn audio_config(sample_rate: u32) -> StreamConfig {
    StreamConfig::Audio(AudioConfig {
        codec: "aac".to_string(),
        sample_rate,
        channels: 2,
        bits_per_channel: 16,
        bit_rate: 128_000,
        codec_extra_data: Bytes::from_static(&[0x11, 0x90]),
    })
}

pub fn video_config(fps: u32) -> StreamConfig {
    StreamConfig::Video(VideoConfig {
        codec: "h264".to_string(),
        width: 1920,
        height: 1080,
        frame_rate_num: fps,
        frame_rate_den: 1,
        bit_rate: 4_000_000,
        codec_extra_data: Bytes::new(),
    })
}

pub struct SimulatedSink {
    stream: StreamType,
    clock: PlayerClock,
    full_every: usize,
    prepared: AtomicBool,
    submissions: AtomicUsize,
    delivered: AtomicUsize,
}

impl SimulatedSink {
    pub fn new(stream: StreamType, clock: PlayerClock, full_every: usize) -> Self {
        Self {
            stream,
            clock,
            full_every,
            prepared: AtomicBool::new(false),
            submissions: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
        }
    }

    /// Packets accepted so far, EOS included.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Acquire)
    }
}

impl EsSink for SimulatedSink {
    fn set_stream(&self, config: &StreamConfig) -> anyhow::Result<()> {
        anyhow::ensure!(
            config.stream_type() == self.stream,
            "{} sink cannot take {}",
            self.stream,
            config
        );
        self.prepared.store(true, Ordering::Release);
        Ok(())
    }

    fn submit(&self, packet: &Packet) -> SubmitStatus {
        if !self.prepared.load(Ordering::Acquire) {
            return SubmitStatus::NotPrepared;
        }
        if packet.stream() != self.stream {
            return SubmitStatus::Rejected(format!("{} packet on {} sink", packet.stream(), self.stream));
        }

        let n = self.submissions.fetch_add(1, Ordering::AcqRel) + 1;
        if self.full_every > 0 && n % self.full_every == 0 {
            return SubmitStatus::Full;
        }

        if self.stream == StreamType::Video {
            self.clock.update(packet.pts());
        }
        self.delivered.fetch_add(1, Ordering::AcqRel);
        SubmitStatus::Success
    }
}

/// XOR "cipher" session that becomes usable once licensed.
pub struct SimulatedSession {
    ready: AtomicBool,
    notify: Notify,
}

impl SimulatedSession {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn license(&self) {
        log::info!("drm: license acquired");
        self.ready.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Acquire the license in the background after `delay`.
    pub fn license_after(self: &Arc<Self>, delay: Duration, cancel: CancellationToken) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => session.license(),
            }
        });
    }

    pub fn encrypt(data: &[u8]) -> Bytes {
        data.iter().map(|b| b ^ KEY).collect()
    }
}

impl Default for SimulatedSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DrmSession for SimulatedSession {
    fn can_decrypt(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn wait_for_ready(&self, cancel: &CancellationToken) -> Result<(), DrmError> {
        loop {
            let notified = self.notify.notified();
            if self.can_decrypt() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(DrmError::Cancelled),
                _ = notified => {}
            }
        }
    }

    async fn decrypt(&self, packet: &Packet, _cancel: &CancellationToken) -> Result<Packet, DrmError> {
        if !self.can_decrypt() {
            return Err(DrmError::NotReady);
        }
        let clear = Self::encrypt(&packet.payload());
        Ok(Packet::data(packet.stream(), packet.pts(), packet.duration(), clear))
    }
}

/// Synthetic demuxer output for one stream.
pub struct Feeder {
    stream: StreamType,
    storage: Arc<PacketStorage>,
    demo: DemoConfig,
    session: Option<Arc<dyn DrmSession>>,
}

impl Feeder {
    pub fn new(stream: StreamType, storage: Arc<PacketStorage>, demo: DemoConfig) -> Self {
        Self {
            stream,
            storage,
            demo,
            session: None,
        }
    }

    pub fn with_session(mut self, session: Arc<dyn DrmSession>) -> Self {
        self.session = Some(session);
        self
    }

    fn packet_duration(&self) -> Pts {
        match self.stream {
            StreamType::Audio => Pts::from_millis(self.demo.audio_packet_ms as i64),
            StreamType::Video => Pts::from_micros(1_000_000 / self.demo.fps.max(1) as i64),
        }
    }

    fn packet(&self, index: usize) -> Packet {
        let duration = self.packet_duration();
        let pts = Pts::from_micros(duration.as_micros() * index as i64);
        let payload = format!("{}-{}", self.stream, index).into_bytes();

        match &self.session {
            Some(session) => Packet::encrypted(
                self.stream,
                pts,
                duration,
                SimulatedSession::encrypt(&payload),
                Arc::clone(session),
            ),
            None => Packet::data(self.stream, pts, duration, Bytes::from(payload)),
        }
    }

    /// Enqueue every packet and a final EOS. Returns the number of packets
    /// accepted by storage.
    pub async fn run(self, cancel: CancellationToken) -> usize {
        let stream = self.stream;
        let mut accepted = 0;

        for index in 0..self.demo.packets_per_stream {
            while self.storage.duration(stream) > MAX_BUFFERED {
                tokio::select! {
                    _ = cancel.cancelled() => return accepted,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
            if cancel.is_cancelled() {
                return accepted;
            }

            if stream == StreamType::Audio && self.demo.audio_switch_at == Some(index) {
                log::info!("{}: switching sample rate in-band", stream);
                self.storage.add_packet(Packet::config_change(audio_config(44_100)));
            }
            if self.storage.add_packet(self.packet(index)) == Enqueue::Stopped {
                log::warn!("{}: storage stopped, feeder exits", stream);
                return accepted;
            }
            accepted += 1;
            tokio::task::yield_now().await;
        }

        self.storage.add_packet(Packet::eos(stream));
        log::info!("{}: fed {} packets and EOS", stream, accepted);
        accepted
    }
}

#[cfg(test)]
#[path = "sim_test.rs"]
mod sim_test;
