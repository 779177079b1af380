//! The transport contract shared by both playback backends.

use std::path::PathBuf;
use std::sync::Arc;

use super::buffer_graph::BufferGraphEngine;
use super::device::DeviceEngine;
use super::output::OutputFactory;
use super::types::{AudioData, BackendKind, EngineEvent, PlaybackState};
use crate::error::EngineError;
use crate::events::{EventBus, Subscription};

/// Interval at which the owner should call [`PlaybackEngine::poll`].
pub const TIME_UPDATE_INTERVAL_MS: u64 = 20;

/// Positions within this distance of the file edges count as the edge when
/// deciding whether a loop range covers the whole file.
const WHOLE_FILE_EPSILON: f64 = 0.01;

pub type EndedCallback = Box<dyn FnMut() + Send>;
pub type TimeUpdateCallback = Box<dyn FnMut(f64) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Playing,
    Paused,
    Destroyed,
}

pub trait PlaybackEngine {
    /// Prepare the audio resource. Repeat calls return the first outcome.
    fn initialize(&mut self) -> Result<(), EngineError>;

    /// Start playback, seeking first when `start_from` is given. Returns
    /// `false` when nothing is loaded or the device refuses.
    fn play(&mut self, start_from: Option<f64>) -> bool;
    fn pause(&mut self);
    /// Clamps to `[0, duration]`; restarts the stream when playing.
    fn seek(&mut self, time: f64);
    fn set_playback_rate(&mut self, rate: f32);
    /// Only a range spanning the whole file loops natively; sub-ranges are
    /// recorded in the state for the owner to enforce.
    fn set_loop_mode(&mut self, enabled: bool, start: f64, end: f64);
    fn set_volume(&mut self, volume: f32);

    fn duration(&self) -> f64;
    fn current_time(&self) -> f64;
    fn is_audio_playing(&self) -> bool;
    fn status(&self) -> PlaybackState;
    fn lifecycle(&self) -> Lifecycle;

    /// Single slot; the last registration wins.
    fn on_ended(&mut self, cb: EndedCallback);
    /// Single slot; the last registration wins.
    fn on_time_update(&mut self, cb: TimeUpdateCallback);
    fn subscribe(&mut self) -> Subscription<EngineEvent>;

    /// Drain device events and emit a time update while playing.
    fn poll(&mut self);
    fn destroy(&mut self);
}

/// State and notification plumbing common to both backends.
pub(crate) struct Transport {
    pub lifecycle: Lifecycle,
    pub state: PlaybackState,
    pub native_loop: bool,
    init_result: Option<Result<(), EngineError>>,
    ended_cb: Option<EndedCallback>,
    time_cb: Option<TimeUpdateCallback>,
    bus: EventBus<EngineEvent>,
    name: &'static str,
}

impl Transport {
    pub fn new(name: &'static str) -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            state: PlaybackState::default(),
            native_loop: false,
            init_result: None,
            ended_cb: None,
            time_cb: None,
            bus: EventBus::default(),
            name,
        }
    }

    /// Run `init` once; later calls replay its result.
    pub fn initialize_with(
        &mut self,
        init: impl FnOnce() -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        if self.lifecycle == Lifecycle::Destroyed {
            log::warn!("{}: initialize on destroyed engine", self.name);
            return Err(EngineError::Destroyed);
        }
        if let Some(result) = &self.init_result {
            return result.clone();
        }
        let result = init();
        match &result {
            Ok(()) => {
                self.lifecycle = Lifecycle::Ready;
                log::info!("{}: ready", self.name);
            }
            Err(e) => log::error!("{}: initialization failed: {e}", self.name),
        }
        self.init_result = Some(result.clone());
        result
    }

    /// Whether `op` may run; otherwise logs and the caller bails out quietly.
    pub fn usable(&self, op: &str) -> bool {
        match self.lifecycle {
            Lifecycle::Destroyed => {
                log::warn!("{}: {op} ignored, engine destroyed", self.name);
                false
            }
            Lifecycle::Uninitialized => {
                log::warn!("{}: {op} ignored, engine not initialized", self.name);
                false
            }
            _ => true,
        }
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.state.is_playing = playing;
        self.lifecycle = if playing {
            Lifecycle::Playing
        } else {
            Lifecycle::Paused
        };
        self.bus.publish(if playing {
            EngineEvent::Play
        } else {
            EngineEvent::Pause
        });
        log::debug!("{}: {:?}", self.name, self.lifecycle);
    }

    pub fn clamp_time(&self, time: f64) -> f64 {
        if time.is_nan() {
            return 0.0;
        }
        time.clamp(0.0, self.state.duration.max(0.0))
    }

    /// Record the loop range; returns whether it loops the whole file.
    pub fn set_loop(&mut self, enabled: bool, start: f64, end: f64) -> bool {
        let start = self.clamp_time(start.min(end));
        let end = self.clamp_time(end.max(start));
        self.state.loop_mode = enabled;
        self.state.loop_start = start;
        self.state.loop_end = end;
        self.native_loop = enabled
            && start <= WHOLE_FILE_EPSILON
            && end >= self.state.duration - WHOLE_FILE_EPSILON;
        self.native_loop
    }

    pub fn publish(&mut self, event: EngineEvent) {
        self.bus.publish(event);
    }

    pub fn subscribe(&mut self) -> Subscription<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn fire_time_update(&mut self, time: f64) {
        if let Some(cb) = &mut self.time_cb {
            cb(time);
        }
        self.bus.publish(EngineEvent::TimeUpdate(time));
    }

    pub fn fire_ended(&mut self) {
        self.state.is_playing = false;
        self.lifecycle = Lifecycle::Paused;
        if let Some(cb) = &mut self.ended_cb {
            cb();
        }
        self.bus.publish(EngineEvent::Ended);
        log::debug!("{}: ended", self.name);
    }

    pub fn on_ended(&mut self, cb: EndedCallback) {
        self.ended_cb = Some(cb);
    }

    pub fn on_time_update(&mut self, cb: TimeUpdateCallback) {
        self.time_cb = Some(cb);
    }

    pub fn destroy(&mut self) {
        if self.lifecycle == Lifecycle::Destroyed {
            return;
        }
        self.lifecycle = Lifecycle::Destroyed;
        self.state.is_playing = false;
        self.ended_cb = None;
        self.time_cb = None;
        self.bus.close();
        log::info!("{}: destroyed", self.name);
    }
}

/// One of the two backends behind the shared contract.
pub enum Engine {
    Device(DeviceEngine),
    BufferGraph(BufferGraphEngine),
}

impl Engine {
    /// Build an engine for `path`. The device backend streams the file
    /// itself; the buffer-graph backend expects `load_audio_data` after
    /// `initialize`, opening its output at `sample_rate`.
    pub fn create(
        kind: BackendKind,
        path: PathBuf,
        sample_rate: u32,
        output: Box<dyn OutputFactory>,
    ) -> Self {
        match kind {
            BackendKind::Device => Engine::Device(DeviceEngine::new(path, output)),
            BackendKind::BufferGraph => {
                Engine::BufferGraph(BufferGraphEngine::new(output, sample_rate))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Engine::Device(_) => BackendKind::Device,
            Engine::BufferGraph(_) => BackendKind::BufferGraph,
        }
    }

    pub fn load_audio_data(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), EngineError> {
        match self {
            Engine::Device(_) => Err(EngineError::Unsupported("loadAudioData")),
            Engine::BufferGraph(e) => e.load_audio_data(samples, sample_rate, channels),
        }
    }

    /// Samples held in-process, available only from the buffer-graph backend.
    pub fn audio_data(&self) -> Option<Arc<AudioData>> {
        match self {
            Engine::Device(_) => None,
            Engine::BufferGraph(e) => e.audio_data(),
        }
    }

    fn inner(&self) -> &dyn PlaybackEngine {
        match self {
            Engine::Device(e) => e,
            Engine::BufferGraph(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn PlaybackEngine {
        match self {
            Engine::Device(e) => e,
            Engine::BufferGraph(e) => e,
        }
    }
}

impl PlaybackEngine for Engine {
    fn initialize(&mut self) -> Result<(), EngineError> {
        self.inner_mut().initialize()
    }

    fn play(&mut self, start_from: Option<f64>) -> bool {
        self.inner_mut().play(start_from)
    }

    fn pause(&mut self) {
        self.inner_mut().pause()
    }

    fn seek(&mut self, time: f64) {
        self.inner_mut().seek(time)
    }

    fn set_playback_rate(&mut self, rate: f32) {
        self.inner_mut().set_playback_rate(rate)
    }

    fn set_loop_mode(&mut self, enabled: bool, start: f64, end: f64) {
        self.inner_mut().set_loop_mode(enabled, start, end)
    }

    fn set_volume(&mut self, volume: f32) {
        self.inner_mut().set_volume(volume)
    }

    fn duration(&self) -> f64 {
        self.inner().duration()
    }

    fn current_time(&self) -> f64 {
        self.inner().current_time()
    }

    fn is_audio_playing(&self) -> bool {
        self.inner().is_audio_playing()
    }

    fn status(&self) -> PlaybackState {
        self.inner().status()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.inner().lifecycle()
    }

    fn on_ended(&mut self, cb: EndedCallback) {
        self.inner_mut().on_ended(cb)
    }

    fn on_time_update(&mut self, cb: TimeUpdateCallback) {
        self.inner_mut().on_time_update(cb)
    }

    fn subscribe(&mut self) -> Subscription<EngineEvent> {
        self.inner_mut().subscribe()
    }

    fn poll(&mut self) {
        self.inner_mut().poll()
    }

    fn destroy(&mut self) {
        self.inner_mut().destroy()
    }
}
