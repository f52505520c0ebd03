use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{EngineState, EsStream};
use crate::{
    clock::PlayerClock,
    config::{AudioConfig, StreamConfig, VideoConfig},
    drm::{DrmError, DrmSession},
    error::EsError,
    events::{StreamEvent, StreamEventReceiver},
    packet::{Packet, PacketType},
    settings::TransferSettings,
    sink::{EsSink, SubmitStatus},
    storage::{Enqueue, PacketStorage},
    sync::Synchronizer,
    types::{Pts, StreamType},
};

/// Records every submission; answers from a script, then `fallback`.
struct TestSink {
    script: Mutex<VecDeque<SubmitStatus>>,
    fallback: Mutex<SubmitStatus>,
    submitted: Mutex<Vec<(Pts, PacketType, Bytes)>>,
    configured: Mutex<Vec<StreamConfig>>,
}

impl TestSink {
    fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    fn scripted(script: Vec<SubmitStatus>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(SubmitStatus::Success),
            submitted: Mutex::new(Vec::new()),
            configured: Mutex::new(Vec::new()),
        })
    }

    fn answer_with(&self, status: SubmitStatus) {
        *self.fallback.lock() = status;
    }

    fn pts(&self) -> Vec<Pts> {
        self.submitted.lock().iter().map(|(pts, _, _)| *pts).collect()
    }

    fn types(&self) -> Vec<PacketType> {
        self.submitted.lock().iter().map(|(_, t, _)| *t).collect()
    }
}

impl EsSink for TestSink {
    fn set_stream(&self, config: &StreamConfig) -> anyhow::Result<()> {
        self.configured.lock().push(config.clone());
        Ok(())
    }

    fn submit(&self, packet: &Packet) -> SubmitStatus {
        self.submitted
            .lock()
            .push((packet.pts(), packet.packet_type(), packet.payload()));
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// Inverts payload bytes once "licensed".
struct TestSession {
    ready: AtomicBool,
    notify: Notify,
    fail: bool,
    released: Arc<AtomicUsize>,
}

impl TestSession {
    fn new(ready: bool, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(ready),
            notify: Notify::new(),
            fail,
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn license(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl DrmSession for TestSession {
    fn can_decrypt(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
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

    async fn decrypt(
        &self,
        packet: &Packet,
        _cancel: &CancellationToken,
    ) -> Result<Packet, DrmError> {
        if self.fail {
            return Err(DrmError::DecryptFailed("no key for kid".to_string()));
        }
        let clear: Bytes = packet.payload().iter().map(|b| b ^ 0xff).collect();
        let released = Arc::clone(&self.released);
        Ok(
            Packet::data(packet.stream(), packet.pts(), packet.duration(), clear).with_release(
                move || {
                    released.fetch_add(1, Ordering::SeqCst);
                },
            ),
        )
    }
}

fn audio_config(sample_rate: u32) -> StreamConfig {
    StreamConfig::Audio(AudioConfig {
        codec: "aac".to_string(),
        sample_rate,
        channels: 2,
        bits_per_channel: 16,
        bit_rate: 128_000,
        codec_extra_data: Bytes::from_static(&[0x11, 0x90]),
    })
}

fn video_config(width: u32, height: u32) -> StreamConfig {
    StreamConfig::Video(VideoConfig {
        codec: "h264".to_string(),
        width,
        height,
        frame_rate_num: 25,
        frame_rate_den: 1,
        bit_rate: 0,
        codec_extra_data: Bytes::new(),
    })
}

fn counted(stream: StreamType, ms: i64, released: &Arc<AtomicUsize>) -> Packet {
    let released = Arc::clone(released);
    Packet::data(
        stream,
        Pts::from_millis(ms),
        Pts::from_millis(40),
        Bytes::from_static(b"au"),
    )
    .with_release(move || {
        released.fetch_add(1, Ordering::SeqCst);
    })
}

fn drain(events: &mut StreamEventReceiver) -> Vec<StreamEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

struct Harness {
    storage: Arc<PacketStorage>,
    synchronizer: Arc<Synchronizer>,
    clock: PlayerClock,
    settings: TransferSettings,
}

impl Harness {
    fn new() -> Self {
        let settings = TransferSettings::default();
        let storage = Arc::new(PacketStorage::new());
        for stream in StreamType::ALL {
            storage.initialize(stream);
        }
        Self {
            storage,
            synchronizer: Arc::new(Synchronizer::new(settings.sync_tolerance())),
            clock: PlayerClock::new(),
            settings,
        }
    }

    fn engine(&self, stream: StreamType) -> EsStream {
        EsStream::new(
            stream,
            Arc::clone(&self.storage),
            Arc::clone(&self.synchronizer),
            self.clock.clone(),
            self.settings.clone(),
        )
    }

    fn configured(&self, config: StreamConfig, sink: &Arc<TestSink>) -> anyhow::Result<EsStream> {
        let engine = self.engine(config.stream_type());
        engine.set_player(sink.clone());
        engine.push_configuration(Some(config))?;
        Ok(engine)
    }

    fn add(&self, packet: Packet) {
        assert_eq!(self.storage.add_packet(packet), Enqueue::Accepted);
    }
}

#[test]
fn test_start_requires_configuration() {
    let harness = Harness::new();
    let engine = harness.engine(StreamType::Video);
    let token = CancellationToken::new();

    assert!(matches!(
        engine.push_configuration(None),
        Err(EsError::NoConfiguration(StreamType::Video))
    ));
    assert!(matches!(
        engine.push_configuration(Some(video_config(1280, 720))),
        Err(EsError::NoPlayer(StreamType::Video))
    ));
    // the configuration is kept even though no sink took it
    assert!(engine.has_configuration());

    assert!(matches!(
        engine.start(&token),
        Err(EsError::NotConfigured(StreamType::Video))
    ));
    assert_eq!(engine.state(), EngineState::Unconfigured);
    assert!(!engine.is_running());
}

#[test]
fn test_set_player_requires_new_configuration() -> anyhow::Result<()> {
    let harness = Harness::new();
    let first = TestSink::new();
    let engine = harness.configured(audio_config(48_000), &first)?;
    assert!(engine.is_configured());
    assert_eq!(engine.state(), EngineState::Configured);

    let second = TestSink::new();
    engine.set_player(second.clone());
    assert!(!engine.is_configured());
    assert_eq!(engine.state(), EngineState::Unconfigured);

    engine.push_configuration(None)?;
    assert_eq!(second.configured.lock().as_slice(), &[audio_config(48_000)]);
    assert_eq!(engine.state(), EngineState::Configured);
    Ok(())
}

#[tokio::test]
async fn test_transfers_in_order_until_eos() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));
    let mut events = engine.subscribe();

    for ms in [0, 40, 80] {
        harness.add(counted(StreamType::Video, ms, &released));
    }
    harness.add(Packet::eos(StreamType::Video));

    engine.start(&CancellationToken::new())?;
    engine.wait_finished().await;

    assert_eq!(
        sink.pts(),
        vec![
            Pts::from_millis(0),
            Pts::from_millis(40),
            Pts::from_millis(80),
            Pts::MAX
        ]
    );
    assert_eq!(sink.types().last(), Some(&PacketType::Eos));
    assert_eq!(released.load(Ordering::SeqCst), 3);
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.current_pts(), Pts::from_millis(80));
    assert_eq!(
        drain(&mut events),
        vec![
            StreamEvent::Buffering(false),
            StreamEvent::PacketProcessed(PacketType::Data),
            StreamEvent::PacketProcessed(PacketType::Data),
            StreamEvent::PacketProcessed(PacketType::Data),
            StreamEvent::PacketProcessed(PacketType::Eos),
            StreamEvent::PacketProcessed(PacketType::Eos),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_start_while_running_is_noop() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    engine.start(&token)?;
    engine.start(&token)?;
    assert!(engine.is_running());
    assert_eq!(engine.state(), EngineState::Transferring);

    harness.add(counted(StreamType::Video, 0, &released));
    harness.add(Packet::eos(StreamType::Video));
    tokio::time::timeout(Duration::from_secs(1), engine.wait_finished()).await?;

    assert_eq!(sink.pts(), vec![Pts::ZERO, Pts::MAX]);
    Ok(())
}

#[tokio::test]
async fn test_starved_stream_reports_buffering() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(audio_config(48_000), &sink)?;
    let mut events = engine.subscribe();

    engine.start(&CancellationToken::new())?;
    let first = tokio::time::timeout(Duration::from_secs(1), events.recv()).await??;
    assert_eq!(first, StreamEvent::Buffering(true));

    engine.stop();
    engine.wait_finished().await;
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(
        drain(&mut events),
        vec![
            StreamEvent::PacketProcessed(PacketType::Eos),
            StreamEvent::Buffering(false),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_full_sink_is_retried_in_place() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::scripted(vec![SubmitStatus::Full, SubmitStatus::Full]);
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));

    harness.add(counted(StreamType::Video, 120, &released));
    harness.add(Packet::eos(StreamType::Video));

    let started = tokio::time::Instant::now();
    engine.start(&CancellationToken::new())?;
    engine.wait_finished().await;

    assert_eq!(started.elapsed(), Duration::from_millis(1000));
    assert_eq!(
        sink.pts(),
        vec![
            Pts::from_millis(120),
            Pts::from_millis(120),
            Pts::from_millis(120),
            Pts::MAX
        ]
    );
    assert_eq!(released.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_keeps_packet_until_emptied() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    sink.answer_with(SubmitStatus::Full);
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));

    harness.add(counted(StreamType::Video, 0, &released));
    engine.start(&CancellationToken::new())?;
    tokio::time::sleep(Duration::from_millis(700)).await;

    let stopped = tokio::time::Instant::now();
    engine.stop();
    engine.wait_finished().await;
    assert!(stopped.elapsed() < Duration::from_millis(1));

    assert_eq!(sink.pts().len(), 2);
    assert_eq!(released.load(Ordering::SeqCst), 0);
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.empty_storage().await;
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(!harness.storage.is_accepting(StreamType::Video));

    drop(engine);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_restart_resubmits_in_flight_packet() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    sink.answer_with(SubmitStatus::Full);
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    harness.add(counted(StreamType::Video, 40, &released));
    engine.start(&token)?;
    tokio::time::sleep(Duration::from_millis(700)).await;
    engine.stop();
    engine.wait_finished().await;

    sink.answer_with(SubmitStatus::Success);
    harness.add(Packet::eos(StreamType::Video));
    engine.start(&token)?;
    engine.wait_finished().await;

    assert_eq!(
        sink.pts(),
        vec![
            Pts::from_millis(40),
            Pts::from_millis(40),
            Pts::from_millis(40),
            Pts::MAX
        ]
    );
    assert_eq!(released.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_parent_token_cancels_transfer() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let token = CancellationToken::new();

    engine.start(&token)?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    tokio::time::timeout(Duration::from_secs(1), engine.wait_finished()).await?;
    assert_eq!(engine.state(), EngineState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_incompatible_audio_change_requests_reconfigure() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(audio_config(48_000), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));
    let mut events = engine.subscribe();

    harness.add(counted(StreamType::Audio, 0, &released));
    harness.add(Packet::config_change(audio_config(44_100)));
    harness.add(counted(StreamType::Audio, 21, &released));
    harness.add(Packet::eos(StreamType::Audio));

    engine.start(&CancellationToken::new())?;
    engine.wait_finished().await;

    assert_eq!(sink.pts(), vec![Pts::ZERO]);
    assert_eq!(harness.storage.count(StreamType::Audio), 2);
    assert!(!engine.is_configured());
    assert_eq!(engine.state(), EngineState::Unconfigured);
    assert_eq!(engine.configuration(), Some(audio_config(44_100)));

    let seen = drain(&mut events);
    assert_eq!(
        seen.iter()
            .filter(|e| **e == StreamEvent::Reconfigure)
            .count(),
        1
    );
    assert!(!seen.iter().any(|e| matches!(e, StreamEvent::PlaybackError(_))));

    // controller side: push the stored configuration and go on
    engine.push_configuration(None)?;
    engine.start(&CancellationToken::new())?;
    engine.wait_finished().await;
    assert_eq!(sink.pts(), vec![Pts::ZERO, Pts::from_millis(21), Pts::MAX]);
    assert_eq!(
        sink.configured.lock().last(),
        Some(&audio_config(44_100))
    );
    Ok(())
}

#[tokio::test]
async fn test_video_change_is_followed_in_band() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));
    let mut events = engine.subscribe();

    harness.add(counted(StreamType::Video, 0, &released));
    harness.add(Packet::config_change(video_config(1280, 720)));
    harness.add(counted(StreamType::Video, 40, &released));
    harness.add(Packet::eos(StreamType::Video));

    engine.start(&CancellationToken::new())?;
    engine.wait_finished().await;

    assert_eq!(
        sink.pts(),
        vec![Pts::ZERO, Pts::from_millis(40), Pts::MAX]
    );
    assert!(engine.is_configured());
    assert_eq!(engine.configuration(), Some(video_config(1280, 720)));
    assert!(!drain(&mut events).contains(&StreamEvent::Reconfigure));
    Ok(())
}

#[tokio::test]
async fn test_encrypted_packet_waits_for_license() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let session = TestSession::new(false, false);
    let mut events = engine.subscribe();

    harness.add(Packet::encrypted(
        StreamType::Video,
        Pts::from_millis(80),
        Pts::from_millis(40),
        Bytes::from_static(&[0x00, 0x0f]),
        session.clone(),
    ));
    harness.add(Packet::eos(StreamType::Video));

    engine.start(&CancellationToken::new())?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sink.pts().is_empty());
    assert!(engine.is_running());

    session.license();
    tokio::time::timeout(Duration::from_secs(1), engine.wait_finished()).await?;

    let submitted = sink.submitted.lock().clone();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].0, Pts::from_millis(80));
    assert_eq!(submitted[0].1, PacketType::Data);
    assert_eq!(submitted[0].2, Bytes::from_static(&[0xff, 0xf0]));
    assert_eq!(session.released.load(Ordering::SeqCst), 1);
    assert_eq!(engine.current_pts(), Pts::from_millis(80));

    assert_eq!(
        drain(&mut events),
        vec![
            StreamEvent::Buffering(false),
            StreamEvent::Buffering(true),
            StreamEvent::Buffering(false),
            StreamEvent::PacketProcessed(PacketType::Encrypted),
            StreamEvent::PacketProcessed(PacketType::Eos),
            StreamEvent::PacketProcessed(PacketType::Eos),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_decrypt_failure_faults_stream() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(audio_config(48_000), &sink)?;
    let session = TestSession::new(true, true);
    let mut events = engine.subscribe();

    harness.add(Packet::encrypted(
        StreamType::Audio,
        Pts::ZERO,
        Pts::from_millis(21),
        Bytes::from_static(b"cipher"),
        session,
    ));

    engine.start(&CancellationToken::new())?;
    tokio::time::timeout(Duration::from_secs(1), engine.wait_finished()).await?;

    assert_eq!(engine.state(), EngineState::Faulted);
    assert!(sink.pts().is_empty());
    let errors: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::PlaybackError(cause) => Some(cause),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("no key for kid"));
    Ok(())
}

#[tokio::test]
async fn test_rejection_faults_until_reset() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::scripted(vec![SubmitStatus::Rejected("bad bitstream".to_string())]);
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));
    let mut events = engine.subscribe();
    let token = CancellationToken::new();

    harness.add(counted(StreamType::Video, 0, &released));
    harness.add(counted(StreamType::Video, 40, &released));

    engine.start(&token)?;
    tokio::time::timeout(Duration::from_secs(1), engine.wait_finished()).await?;

    assert_eq!(engine.state(), EngineState::Faulted);
    assert_eq!(sink.pts(), vec![Pts::ZERO]);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        StreamEvent::PlaybackError(cause) if cause.contains("bad bitstream")
    )));

    // input closed
    assert_eq!(
        harness
            .storage
            .add_packet(counted(StreamType::Video, 80, &released)),
        Enqueue::Stopped
    );
    assert!(matches!(
        engine.start(&token),
        Err(EsError::Faulted(StreamType::Video))
    ));

    engine.reset().await?;
    assert_eq!(engine.state(), EngineState::Configured);
    // rejected packet, the one left queued and the one refused after close
    assert_eq!(released.load(Ordering::SeqCst), 3);

    harness.add(counted(StreamType::Video, 120, &released));
    harness.add(Packet::eos(StreamType::Video));
    engine.start(&token)?;
    engine.wait_finished().await;
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(
        sink.pts(),
        vec![Pts::ZERO, Pts::from_millis(120), Pts::MAX]
    );
    Ok(())
}

#[tokio::test]
async fn test_reset_while_running_is_busy() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = harness.configured(video_config(1920, 1080), &sink)?;

    engine.start(&CancellationToken::new())?;
    assert!(matches!(
        engine.reset().await,
        Err(EsError::Busy(StreamType::Video))
    ));

    engine.stop();
    engine.wait_finished().await;
    engine.reset().await?;
    Ok(())
}

#[tokio::test]
async fn test_video_paced_against_audio() -> anyhow::Result<()> {
    let harness = Harness::new();
    let audio_sink = TestSink::new();
    let video_sink = TestSink::new();
    let audio = harness.configured(audio_config(48_000), &audio_sink)?;
    let video = harness.configured(video_config(1920, 1080), &video_sink)?;
    let token = CancellationToken::new();
    let released = Arc::new(AtomicUsize::new(0));

    harness.add(counted(StreamType::Audio, 0, &released));
    for ms in [0, 1_000, 2_000, 3_000] {
        harness.add(counted(StreamType::Video, ms, &released));
    }

    audio.start(&token)?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(audio_sink.pts(), vec![Pts::ZERO]);

    video.start(&token)?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // 1s is more than the tolerance ahead of audio
    assert_eq!(video_sink.pts(), vec![Pts::ZERO, Pts::from_millis(1_000)]);

    harness.add(counted(StreamType::Audio, 600, &released));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        video_sink.pts(),
        vec![Pts::ZERO, Pts::from_millis(1_000), Pts::from_millis(2_000)]
    );

    // audio reaching its end releases video entirely
    harness.add(Packet::eos(StreamType::Audio));
    harness.add(Packet::eos(StreamType::Video));
    tokio::time::timeout(Duration::from_secs(1), audio.wait_finished()).await?;
    tokio::time::timeout(Duration::from_secs(1), video.wait_finished()).await?;
    assert_eq!(video_sink.pts().len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_start_is_noop_while_a_waiter_is_pending() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    let engine = Arc::new(harness.configured(video_config(1920, 1080), &sink)?);
    let token = CancellationToken::new();

    engine.start(&token)?;
    let waiter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.wait_finished().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(engine.is_running());
    engine.start(&token)?;
    engine.stop();

    tokio::time::timeout(Duration::from_secs(1), waiter).await??;
    assert!(!engine.is_running());
    assert_eq!(engine.state(), EngineState::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_storage_ends_a_retrying_loop() -> anyhow::Result<()> {
    let harness = Harness::new();
    let sink = TestSink::new();
    sink.answer_with(SubmitStatus::NotPrepared);
    let engine = harness.configured(video_config(1920, 1080), &sink)?;
    let released = Arc::new(AtomicUsize::new(0));

    harness.add(counted(StreamType::Video, 0, &released));
    harness.add(counted(StreamType::Video, 40, &released));
    engine.start(&CancellationToken::new())?;
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(sink.pts().len(), 3);

    tokio::time::timeout(Duration::from_secs(5), engine.empty_storage()).await?;
    assert!(!engine.is_running());
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.enable_input();
    assert!(harness.storage.is_accepting(StreamType::Video));
    Ok(())
}

struct PanickingSink;

impl EsSink for PanickingSink {
    fn set_stream(&self, _config: &StreamConfig) -> anyhow::Result<()> {
        Ok(())
    }

    fn submit(&self, _packet: &Packet) -> SubmitStatus {
        panic!("decoder crashed");
    }
}

#[tokio::test]
async fn test_sink_panic_faults_stream() -> anyhow::Result<()> {
    let harness = Harness::new();
    let engine = harness.engine(StreamType::Audio);
    engine.set_player(Arc::new(PanickingSink));
    engine.push_configuration(Some(audio_config(48_000)))?;
    let released = Arc::new(AtomicUsize::new(0));
    let mut events = engine.subscribe();

    // audio already paces its siblings
    harness
        .synchronizer
        .data_out(&counted(StreamType::Audio, 0, &released));
    harness.add(counted(StreamType::Audio, 20, &released));
    engine.start(&CancellationToken::new())?;
    tokio::time::timeout(Duration::from_secs(1), engine.wait_finished()).await?;

    assert_eq!(engine.state(), EngineState::Faulted);
    assert!(!engine.is_running());
    assert!(!harness.storage.is_accepting(StreamType::Audio));

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        e,
        StreamEvent::PlaybackError(cause) if cause.contains("decoder crashed")
    )));
    assert_eq!(
        seen.last(),
        Some(&StreamEvent::PacketProcessed(PacketType::Eos))
    );

    // the sibling is no longer paced against the failed stream
    harness
        .synchronizer
        .data_out(&counted(StreamType::Video, 5_000, &released));
    tokio::time::timeout(
        Duration::from_millis(100),
        harness
            .synchronizer
            .synchronize(StreamType::Video, &CancellationToken::new()),
    )
    .await??;
    Ok(())
}
