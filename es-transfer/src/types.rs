use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Elementary stream kinds handled by the pipeline.
///
/// The set is closed; per-stream tables are plain arrays indexed by
/// [`StreamType::index`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Audio,
    Video,
}

impl StreamType {
    pub const COUNT: usize = 2;
    pub const ALL: [StreamType; Self::COUNT] = [StreamType::Audio, StreamType::Video];

    pub fn index(self) -> usize {
        match self {
            StreamType::Audio => 0,
            StreamType::Video => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Audio => "Audio",
            StreamType::Video => "Video",
        }
    }
}

impl Display for StreamType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation timestamp in microseconds.
///
/// `Pts::MAX` and `Pts::MIN` are sentinels meaning "no real timestamp"
/// (EOS and configuration packets carry them) and are skipped by any pts
/// bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pts(i64);

impl Pts {
    pub const ZERO: Pts = Pts(0);
    pub const MAX: Pts = Pts(i64::MAX);
    pub const MIN: Pts = Pts(i64::MIN);

    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1_000))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    pub fn from_duration(d: Duration) -> Self {
        Self(i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn is_sentinel(self) -> bool {
        self == Self::MAX || self == Self::MIN
    }

    /// `self - other`, saturating at the sentinels instead of overflowing.
    pub fn saturating_sub(self, other: Pts) -> Pts {
        Pts(self.0.saturating_sub(other.0))
    }

    /// Absolute distance between two timestamps as a `Duration`.
    pub fn abs_diff(self, other: Pts) -> Duration {
        Duration::from_micros(self.0.abs_diff(other.0))
    }

    /// Non-negative part of `self` as a `Duration`.
    pub fn to_duration(self) -> Duration {
        Duration::from_micros(self.0.max(0) as u64)
    }
}

impl Display for Pts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Pts::MAX => f.write_str("+inf"),
            Pts::MIN => f.write_str("-inf"),
            pts => write!(f, "{:.3}s", pts.as_secs_f64()),
        }
    }
}
