use serde::{Deserialize, Serialize};

/// Decoded audio held entirely in memory. Read-only once built.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioData {
    /// Interleaved samples normalized to [-1.0, 1.0], one or two channels.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Duration in seconds.
    pub duration: f64,
}

impl AudioData {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels as usize;
        let duration = if sample_rate > 0 {
            frames as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self {
            samples,
            sample_rate,
            channels,
            duration,
        }
    }

    /// Total number of frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Mix down to mono, returning one sample per frame.
    pub fn to_mono(&self) -> Vec<f32> {
        let ch = self.channels as usize;
        if ch == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }
}

/// Snapshot of an engine's transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f32,
    pub is_playing: bool,
    pub volume: f32,
    pub loop_mode: bool,
    pub loop_start: f64,
    pub loop_end: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
            is_playing: false,
            volume: 1.0,
            loop_mode: false,
            loop_start: 0.0,
            loop_end: 0.0,
        }
    }
}

/// Notifications published by an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    Play,
    Pause,
    Seeked(f64),
    TimeUpdate(f64),
    Ended,
    RateChanged(f32),
    VolumeChanged(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Streams the file straight to the device; position comes from the stream.
    Device,
    /// Plays an in-memory buffer; position comes from an anchored clock.
    #[default]
    BufferGraph,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "device" => Some(BackendKind::Device),
            "buffer" | "buffer_graph" | "buffer-graph" => Some(BackendKind::BufferGraph),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Device => "Device",
            BackendKind::BufferGraph => "Buffer",
        }
    }
}
