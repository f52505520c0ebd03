use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use bytes::Bytes;

use crate::{
    config::StreamConfig,
    drm::DrmSession,
    types::{Pts, StreamType},
};

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

pub enum PacketKind {
    /// Clear payload, ready for the sink. Decrypted packets are data too.
    Data(Bytes),
    /// Payload that must go through `session` before submission.
    Encrypted {
        data: Bytes,
        session: Arc<dyn DrmSession>,
    },
    /// End of stream marker.
    Eos,
    /// In-band stream configuration change.
    ConfigChange(StreamConfig),
}

/// Payload-free tag of a [`PacketKind`], used in notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data,
    Encrypted,
    Eos,
    ConfigChange,
}

impl Display for PacketType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacketType::Data => "Data",
            PacketType::Encrypted => "Encrypted",
            PacketType::Eos => "EOS",
            PacketType::ConfigChange => "ConfigChange",
        };
        f.write_str(name)
    }
}

/// One elementary stream access unit.
///
/// A packet has a single owner at a time (feeder, storage queue or transfer
/// loop). Dropping it releases it: the optional release hook runs exactly
/// once, wherever the packet ends up.
pub struct Packet {
    stream: StreamType,
    pts: Pts,
    duration: Pts,
    kind: PacketKind,
    release: Option<ReleaseHook>,
}

impl Packet {
    pub fn new(stream: StreamType, pts: Pts, duration: Pts, kind: PacketKind) -> Self {
        Self {
            stream,
            pts,
            duration,
            kind,
            release: None,
        }
    }

    pub fn data(stream: StreamType, pts: Pts, duration: Pts, data: Bytes) -> Self {
        Self::new(stream, pts, duration, PacketKind::Data(data))
    }

    pub fn encrypted(
        stream: StreamType,
        pts: Pts,
        duration: Pts,
        data: Bytes,
        session: Arc<dyn DrmSession>,
    ) -> Self {
        Self::new(stream, pts, duration, PacketKind::Encrypted { data, session })
    }

    pub fn eos(stream: StreamType) -> Self {
        Self::new(stream, Pts::MAX, Pts::ZERO, PacketKind::Eos)
    }

    pub fn config_change(config: StreamConfig) -> Self {
        Self::new(
            config.stream_type(),
            Pts::MAX,
            Pts::ZERO,
            PacketKind::ConfigChange(config),
        )
    }

    /// Attach a hook run when the packet is released (dropped).
    pub fn with_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn stream(&self) -> StreamType {
        self.stream
    }

    pub fn pts(&self) -> Pts {
        self.pts
    }

    pub fn duration(&self) -> Pts {
        self.duration
    }

    pub fn kind(&self) -> &PacketKind {
        &self.kind
    }

    pub fn packet_type(&self) -> PacketType {
        match self.kind {
            PacketKind::Data(_) => PacketType::Data,
            PacketKind::Encrypted { .. } => PacketType::Encrypted,
            PacketKind::Eos => PacketType::Eos,
            PacketKind::ConfigChange(_) => PacketType::ConfigChange,
        }
    }

    pub fn is_eos(&self) -> bool {
        matches!(self.kind, PacketKind::Eos)
    }

    /// Payload bytes; empty for EOS and configuration packets.
    pub fn payload(&self) -> Bytes {
        match &self.kind {
            PacketKind::Data(data) | PacketKind::Encrypted { data, .. } => data.clone(),
            PacketKind::Eos | PacketKind::ConfigChange(_) => Bytes::new(),
        }
    }

    pub fn size(&self) -> usize {
        match &self.kind {
            PacketKind::Data(data) | PacketKind::Encrypted { data, .. } => data.len(),
            PacketKind::Eos | PacketKind::ConfigChange(_) => 0,
        }
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("stream", &self.stream)
            .field("type", &self.packet_type())
            .field("pts", &self.pts)
            .field("duration", &self.duration)
            .field("size", &self.size())
            .finish()
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} pts: {} duration: {} size: {}",
            self.stream,
            self.packet_type(),
            self.pts,
            self.duration,
            self.size()
        )
    }
}
