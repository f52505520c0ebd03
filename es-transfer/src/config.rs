use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::types::StreamType;

/// Audio codec description pushed to the sink.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AudioConfig {
    // "aac", "ac3", "eac3", "opus", ...
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_channel: u16,
    // bps, 0 = unknown
    pub bit_rate: u64,
    pub codec_extra_data: Bytes,
}

/// Video codec description pushed to the sink.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VideoConfig {
    // "h264", "hevc", "vp9", ...
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    // bps, 0 = unknown
    pub bit_rate: u64,
    pub codec_extra_data: Bytes,
}

impl VideoConfig {
    pub fn fps(&self) -> f32 {
        if self.frame_rate_den == 0 {
            return 0.0;
        }
        self.frame_rate_num as f32 / self.frame_rate_den as f32
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StreamConfig {
    Audio(AudioConfig),
    Video(VideoConfig),
}

impl StreamConfig {
    pub fn stream_type(&self) -> StreamType {
        match self {
            StreamConfig::Audio(_) => StreamType::Audio,
            StreamConfig::Video(_) => StreamType::Video,
        }
    }

    /// Whether the sink can switch to `other` without being reset.
    ///
    /// Audio decoders cannot change codec or sample layout in-band. Video
    /// decoders follow resolution changes on their own.
    pub fn is_compatible(&self, other: &StreamConfig) -> bool {
        match (self, other) {
            (StreamConfig::Audio(a), StreamConfig::Audio(b)) => {
                a.codec == b.codec
                    && a.sample_rate == b.sample_rate
                    && a.channels == b.channels
                    && a.bits_per_channel == b.bits_per_channel
            }
            (StreamConfig::Video(_), StreamConfig::Video(_)) => true,
            _ => false,
        }
    }
}

impl Display for StreamConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamConfig::Audio(a) => write!(
                f,
                "Audio {{ codec: {}, sample_rate: {}, channels: {}, bits: {}, bit_rate: {} }}",
                a.codec, a.sample_rate, a.channels, a.bits_per_channel, a.bit_rate
            ),
            StreamConfig::Video(v) => write!(
                f,
                "Video {{ codec: {}, {}x{} @ {:.2}fps, bit_rate: {} }}",
                v.codec,
                v.width,
                v.height,
                v.fps(),
                v.bit_rate
            ),
        }
    }
}
