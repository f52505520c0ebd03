use std::sync::Arc;
use std::time::Duration;

use es_transfer::{
    DrmSession, EngineState, EsStream, PacketStorage, PacketType, PlayerClock, StreamEvent,
    StreamType, Synchronizer, TransferSettings,
};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::PlayerConfig;
use crate::sim::{Feeder, SimulatedSession, SimulatedSink, audio_config, video_config};

struct Track {
    engine: EsStream,
    sink: Arc<SimulatedSink>,
}

/// Drives an audio and a video [`EsStream`] from synthetic content to
/// simulated sinks and reacts to their events.
pub struct Player {
    config: PlayerConfig,
    storage: Arc<PacketStorage>,
    clock: PlayerClock,
    tracks: Vec<Track>,
    session: Option<Arc<SimulatedSession>>,
}

/// Per-stream count of packets the sinks accepted, EOS included.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub delivered: [usize; StreamType::COUNT],
}

impl Player {
    pub fn new(config: PlayerConfig) -> anyhow::Result<Self> {
        let settings: &TransferSettings = &config.transfer;
        let storage = Arc::new(PacketStorage::new());
        let synchronizer = Arc::new(Synchronizer::new(settings.sync_tolerance()));
        let clock = PlayerClock::new();

        let mut tracks = Vec::with_capacity(StreamType::COUNT);
        for stream in StreamType::ALL {
            storage.initialize(stream);
            let engine = EsStream::new(
                stream,
                Arc::clone(&storage),
                Arc::clone(&synchronizer),
                clock.clone(),
                settings.clone(),
            );
            let sink = Arc::new(SimulatedSink::new(
                stream,
                clock.clone(),
                config.demo.full_every,
            ));
            engine.set_player(sink.clone());
            engine.store_configuration(match stream {
                StreamType::Audio => audio_config(48_000),
                StreamType::Video => video_config(config.demo.fps),
            });
            engine.push_configuration(None)?;
            tracks.push(Track { engine, sink });
        }

        let session = config.demo.encrypted.then(|| Arc::new(SimulatedSession::new()));

        Ok(Self {
            config,
            storage,
            clock,
            tracks,
            session,
        })
    }

    fn track(&self, stream: StreamType) -> &Track {
        &self.tracks[stream.index()]
    }

    /// Play until every stream delivered its EOS, a stream fails, or
    /// `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<Summary> {
        let feeding = cancel.child_token();
        let mut feeders = Vec::with_capacity(self.tracks.len());
        for track in &self.tracks {
            let stream = track.engine.stream_type();
            let mut feeder = Feeder::new(stream, Arc::clone(&self.storage), self.config.demo.clone());
            if let (Some(session), StreamType::Video) = (&self.session, stream) {
                feeder = feeder.with_session(Arc::clone(session) as Arc<dyn DrmSession>);
            }
            feeders.push(tokio::spawn(feeder.run(feeding.clone())));
        }
        if let Some(session) = &self.session {
            session.license_after(
                Duration::from_millis(self.config.demo.license_delay_ms),
                feeding.clone(),
            );
        }

        // subscribe before starting so no event is missed
        let events = futures::stream::select_all(self.tracks.iter().map(|track| {
            let stream = track.engine.stream_type();
            track.engine.events().map(move |event| (stream, event))
        }));

        self.clock.play();
        let result = match self.start_all(&cancel) {
            Ok(()) => self.control(events, &cancel).await,
            Err(e) => Err(e),
        };

        feeding.cancel();
        for track in &self.tracks {
            track.engine.stop();
        }
        for track in &self.tracks {
            track.engine.wait_finished().await;
        }
        for feeder in feeders {
            if let Err(e) = feeder.await {
                log::error!("feeder join error: {}", e);
            }
        }
        self.clock.pause();
        self.storage.dispose();

        result?;
        let mut summary = Summary::default();
        for track in &self.tracks {
            summary.delivered[track.engine.stream_type().index()] = track.sink.delivered();
        }
        log::info!("playback finished: {:?}", summary);
        Ok(summary)
    }

    fn start_all(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        for track in &self.tracks {
            track.engine.start(cancel)?;
        }
        Ok(())
    }

    async fn control(
        &self,
        mut events: impl Stream<Item = (StreamType, StreamEvent)> + Unpin,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let mut finished = [false; StreamType::COUNT];

        while !finished.iter().all(|f| *f) {
            let (stream, event) = tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("playback cancelled");
                    return Ok(());
                }
                next = events.next() => match next {
                    Some(next) => next,
                    None => return Ok(()),
                },
            };
            let engine = &self.track(stream).engine;

            match event {
                StreamEvent::Buffering(true) => log::info!("{}: buffering", stream),
                StreamEvent::Buffering(false) => log::debug!("{}: buffering done", stream),
                StreamEvent::Reconfigure => {
                    log::info!("{}: reconfiguring", stream);
                    engine.stop();
                    engine.wait_finished().await;
                    engine.push_configuration(None)?;
                    engine.start(cancel)?;
                }
                StreamEvent::PlaybackError(cause) => {
                    for track in &self.tracks {
                        track.engine.stop();
                    }
                    anyhow::bail!("{}: playback error: {}", stream, cause);
                }
                StreamEvent::PacketProcessed(PacketType::Eos) => {
                    if engine.state() == EngineState::Stopped && !finished[stream.index()] {
                        log::info!("{}: finished at {}", stream, engine.current_pts());
                        finished[stream.index()] = true;
                    }
                }
                StreamEvent::PacketProcessed(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "player_test.rs"]
mod player_test;
