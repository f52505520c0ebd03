use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::types::Pts;

/// Shared playback clock.
///
/// The sink (or whoever tracks rendering) reports positions with
/// [`PlayerClock::update`]; transfer loops read [`PlayerClock::last`] to
/// decide whether a starved stream should report buffering.
#[derive(Clone)]
pub struct PlayerClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    // last reported position
    base_pts: Pts,
    base_instant: Instant,
    playback_rate: f64,
    paused: bool,
}

impl PlayerClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_pts: Pts::ZERO,
                base_instant: Instant::now(),
                playback_rate: 1.0,
                paused: true,
            })),
        }
    }

    /// Last position reported through `update`.
    pub fn last(&self) -> Pts {
        self.inner.lock().base_pts
    }

    /// Position extrapolated from the last report while playing.
    pub fn now(&self) -> Pts {
        let inner = self.inner.lock();
        Self::now_unlocked(&inner)
    }

    pub fn update(&self, pts: Pts) {
        if pts.is_sentinel() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
    }

    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.base_pts = Self::now_unlocked(&inner);
            inner.base_instant = Instant::now();
            inner.paused = true;
        }
    }

    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.base_pts = Self::now_unlocked(&inner);
            inner.base_instant = Instant::now();
        }
        inner.playback_rate = rate;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn now_unlocked(inner: &ClockInner) -> Pts {
        if inner.paused {
            return inner.base_pts;
        }
        let elapsed = inner.base_instant.elapsed().as_micros() as f64;
        let advanced = (elapsed * inner.playback_rate) as i64;
        Pts::from_micros(inner.base_pts.as_micros().saturating_add(advanced))
    }
}

impl Default for PlayerClock {
    fn default() -> Self {
        Self::new()
    }
}
