use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic time source of an output device, in seconds.
pub trait DeviceClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Device time derived from the number of frames the output has rendered.
pub struct StreamClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl StreamClock {
    pub fn new(frames: Arc<AtomicU64>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate: sample_rate.max(1),
        }
    }
}

impl DeviceClock for StreamClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

/// Playback position for a source that only knows elapsed device time.
///
/// While running, `position = anchor_position + (now - anchor_device_time) * rate`.
/// Every discontinuity (start, stop, seek, rate change) re-anchors both
/// values together so errors never accumulate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackClock {
    anchor_device_time: f64,
    anchor_position: f64,
    rate: f64,
    running: bool,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            anchor_device_time: 0.0,
            anchor_position: 0.0,
            rate: 1.0,
            running: false,
        }
    }
}

impl PlaybackClock {
    pub fn position(&self, now: f64) -> f64 {
        if self.running {
            self.anchor_position + (now - self.anchor_device_time).max(0.0) * self.rate
        } else {
            self.anchor_position
        }
    }

    pub fn start(&mut self, now: f64, position: f64) {
        self.reanchor(now, position);
        self.running = true;
    }

    /// Stop advancing; returns the position it froze at.
    pub fn stop(&mut self, now: f64) -> f64 {
        let position = self.position(now);
        self.reanchor(now, position);
        self.running = false;
        position
    }

    /// Jump to `position`, keeping the running state.
    pub fn reanchor(&mut self, now: f64, position: f64) {
        self.anchor_device_time = now;
        self.anchor_position = position;
    }

    pub fn set_rate(&mut self, now: f64, rate: f64) {
        let position = self.position(now);
        self.reanchor(now, position);
        self.rate = rate;
    }
}

/// Device clock advanced by hand.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn advance(&self, seconds: f64) {
        let now = self.now() + seconds;
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }
}

#[cfg(test)]
impl DeviceClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_by_rate_while_running() {
        for rate in [0.5, 1.0, 2.0] {
            let mut clock = PlaybackClock::default();
            clock.set_rate(10.0, rate);
            clock.start(10.0, 3.0);
            assert!((clock.position(12.0) - (3.0 + 2.0 * rate)).abs() < 1e-9);
        }
    }

    #[test]
    fn frozen_while_stopped() {
        let mut clock = PlaybackClock::default();
        clock.start(0.0, 1.0);
        assert!((clock.stop(2.0) - 3.0).abs() < 1e-9);
        assert!((clock.position(50.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn rate_change_reanchors_without_jump() {
        let mut clock = PlaybackClock::default();
        clock.start(0.0, 0.0);
        clock.set_rate(4.0, 2.0);
        assert!((clock.position(4.0) - 4.0).abs() < 1e-9);
        assert!((clock.position(5.0) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn stream_clock_counts_frames() {
        let frames = Arc::new(AtomicU64::new(0));
        let clock = StreamClock::new(frames.clone(), 48_000);
        frames.store(24_000, Ordering::Relaxed);
        assert!((clock.now() - 0.5).abs() < 1e-9);
    }
}
