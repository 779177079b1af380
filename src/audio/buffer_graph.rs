use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::clock::PlaybackClock;
use super::engine::{EndedCallback, Lifecycle, PlaybackEngine, TimeUpdateCallback, Transport};
use super::output::{OutputFactory, OutputHandle};
use super::render::{FrameSource, RenderCommand, RenderEvent, Voice};
use super::types::{AudioData, EngineEvent, PlaybackState};
use crate::error::EngineError;
use crate::events::Subscription;

/// Plays an in-memory buffer from a frame offset, like a one-shot source node.
struct BufferSource {
    audio: Arc<AudioData>,
    cursor: usize,
    looping: Arc<AtomicBool>,
}

impl FrameSource for BufferSource {
    fn channels(&self) -> u16 {
        self.audio.channels
    }

    fn pull(&mut self, out: &mut [f32]) -> Option<usize> {
        let ch = self.audio.channels as usize;
        let total = self.audio.num_frames();
        if self.cursor >= total {
            if self.looping.load(Ordering::Relaxed) && total > 0 {
                self.cursor = 0;
            } else {
                return None;
            }
        }
        let frames = (out.len() / ch).min(total - self.cursor);
        let start = self.cursor * ch;
        out[..frames * ch].copy_from_slice(&self.audio.samples[start..start + frames * ch]);
        self.cursor += frames;
        Some(frames)
    }
}

/// Backend that owns the decoded samples. The device only reports elapsed
/// time since a voice started, so position comes from an anchored clock.
pub struct BufferGraphEngine {
    transport: Transport,
    factory: Box<dyn OutputFactory>,
    output: Option<OutputHandle>,
    preferred_rate: u32,
    audio: Option<Arc<AudioData>>,
    clock: PlaybackClock,
    generation: u64,
    looping: Arc<AtomicBool>,
}

impl BufferGraphEngine {
    pub fn new(factory: Box<dyn OutputFactory>, sample_rate: u32) -> Self {
        Self {
            transport: Transport::new("buffer-graph"),
            factory,
            output: None,
            preferred_rate: sample_rate,
            audio: None,
            clock: PlaybackClock::default(),
            generation: 0,
            looping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the samples to play. Stops any current playback and rewinds.
    pub fn load_audio_data(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), EngineError> {
        if !self.transport.usable("loadAudioData") {
            return Err(if self.transport.lifecycle == Lifecycle::Destroyed {
                EngineError::Destroyed
            } else {
                EngineError::NotInitialized
            });
        }

        self.stop_voice();
        let needs_reopen = self
            .output
            .as_ref()
            .map_or(true, |o| o.sample_rate != sample_rate);
        if needs_reopen {
            self.output = Some(self.factory.open(sample_rate, channels)?);
        }

        let audio = AudioData::new(samples, sample_rate, channels);
        self.transport.state.duration = audio.duration;
        self.transport.state.current_time = 0.0;
        self.audio = Some(Arc::new(audio));

        let now = self.now();
        self.clock.stop(now);
        self.clock.reanchor(now, 0.0);
        if self.transport.state.is_playing {
            self.transport.set_playing(false);
        }
        Ok(())
    }

    /// The samples this engine plays, for feeding the analysis pipeline.
    pub fn audio_data(&self) -> Option<Arc<AudioData>> {
        self.audio.clone()
    }

    fn now(&self) -> f64 {
        self.output.as_ref().map(|o| o.clock.now()).unwrap_or(0.0)
    }

    fn position(&self) -> f64 {
        let raw = self.clock.position(self.now());
        let duration = self.transport.state.duration;
        if self.transport.native_loop && duration > 0.0 {
            raw.rem_euclid(duration)
        } else {
            raw.clamp(0.0, duration.max(0.0))
        }
    }

    fn start_voice(&mut self, from: f64) -> Result<(), EngineError> {
        let (Some(output), Some(audio)) = (&self.output, &self.audio) else {
            return Err(EngineError::NoAudioLoaded);
        };
        self.generation += 1;
        let cursor = ((from * audio.sample_rate as f64) as usize).min(audio.num_frames());
        let source = BufferSource {
            audio: Arc::clone(audio),
            cursor,
            looping: Arc::clone(&self.looping),
        };
        let voice = Voice::new(
            self.generation,
            Box::new(source),
            audio.sample_rate,
            self.transport.state.playback_rate,
        );
        output.send(RenderCommand::Start(voice))
    }

    fn stop_voice(&mut self) {
        if let Some(output) = &self.output {
            let _ = output.send(RenderCommand::Stop);
        }
    }
}

impl PlaybackEngine for BufferGraphEngine {
    fn initialize(&mut self) -> Result<(), EngineError> {
        let factory = &self.factory;
        let output = &mut self.output;
        let rate = self.preferred_rate;
        self.transport.initialize_with(|| {
            *output = Some(factory.open(rate, 2)?);
            Ok(())
        })
    }

    fn play(&mut self, start_from: Option<f64>) -> bool {
        if !self.transport.usable("play") {
            return false;
        }
        if self.audio.is_none() {
            log::warn!("buffer-graph: play rejected, no audio loaded");
            return false;
        }
        if let Some(t) = start_from {
            self.seek(t);
        }
        if self.transport.state.is_playing {
            return true;
        }

        let mut from = self.position();
        if from >= self.transport.state.duration {
            from = 0.0;
        }
        if let Err(e) = self.start_voice(from) {
            log::warn!("buffer-graph: play failed: {e}");
            return false;
        }
        let now = self.now();
        self.clock.start(now, from);
        self.transport.set_playing(true);
        true
    }

    fn pause(&mut self) {
        if !self.transport.usable("pause") || !self.transport.state.is_playing {
            return;
        }
        let position = self.position();
        let now = self.now();
        self.clock.stop(now);
        self.clock.reanchor(now, position);
        self.stop_voice();
        self.transport.state.current_time = position;
        self.transport.set_playing(false);
    }

    fn seek(&mut self, time: f64) {
        if !self.transport.usable("seek") {
            return;
        }
        let time = self.transport.clamp_time(time);
        let now = self.now();
        self.clock.reanchor(now, time);
        self.transport.state.current_time = time;

        if self.transport.state.is_playing {
            // The new voice's generation supersedes the old one, whose
            // end-of-buffer can no longer report `Ended`.
            if let Err(e) = self.start_voice(time) {
                log::warn!("buffer-graph: restart after seek failed: {e}");
                self.clock.stop(now);
                self.transport.set_playing(false);
            }
        }
        self.transport.publish(EngineEvent::Seeked(time));
    }

    fn set_playback_rate(&mut self, rate: f32) {
        if !self.transport.usable("setPlaybackRate") {
            return;
        }
        if !(rate > 0.0 && rate.is_finite()) {
            log::warn!("buffer-graph: ignoring playback rate {rate}");
            return;
        }
        let now = self.now();
        self.clock.set_rate(now, rate as f64);
        self.transport.state.playback_rate = rate;
        if let Some(output) = &self.output {
            let _ = output.send(RenderCommand::SetTempo(rate));
        }
        self.transport.publish(EngineEvent::RateChanged(rate));
    }

    fn set_loop_mode(&mut self, enabled: bool, start: f64, end: f64) {
        if !self.transport.usable("setLoopMode") {
            return;
        }
        // Fold any wrapped position back in before the flag changes.
        let position = self.position();
        self.clock.reanchor(self.now(), position);
        let native = self.transport.set_loop(enabled, start, end);
        self.looping.store(native, Ordering::Relaxed);
    }

    fn set_volume(&mut self, volume: f32) {
        if !self.transport.usable("setVolume") {
            return;
        }
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.transport.state.volume = volume;
        if let Some(output) = &self.output {
            let _ = output.send(RenderCommand::SetVolume(volume));
        }
        self.transport.publish(EngineEvent::VolumeChanged(volume));
    }

    fn duration(&self) -> f64 {
        self.transport.state.duration
    }

    fn current_time(&self) -> f64 {
        if self.transport.lifecycle == Lifecycle::Destroyed {
            return self.transport.state.current_time;
        }
        self.position()
    }

    fn is_audio_playing(&self) -> bool {
        self.transport.state.is_playing
    }

    fn status(&self) -> PlaybackState {
        PlaybackState {
            current_time: self.current_time(),
            ..self.transport.state
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        self.transport.lifecycle
    }

    fn on_ended(&mut self, cb: EndedCallback) {
        self.transport.on_ended(cb);
    }

    fn on_time_update(&mut self, cb: TimeUpdateCallback) {
        self.transport.on_time_update(cb);
    }

    fn subscribe(&mut self) -> Subscription<EngineEvent> {
        self.transport.subscribe()
    }

    fn poll(&mut self) {
        if matches!(
            self.transport.lifecycle,
            Lifecycle::Destroyed | Lifecycle::Uninitialized
        ) {
            return;
        }

        let events: Vec<RenderEvent> = self
            .output
            .as_ref()
            .map(|o| o.events.try_iter().collect())
            .unwrap_or_default();
        for event in events {
            match event {
                RenderEvent::Ended { generation } if generation == self.generation => {
                    if self.transport.state.is_playing {
                        let duration = self.transport.state.duration;
                        let now = self.now();
                        self.clock.stop(now);
                        self.clock.reanchor(now, duration);
                        self.transport.state.current_time = duration;
                        self.transport.fire_ended();
                    }
                }
                RenderEvent::Ended { .. } => {}
                RenderEvent::Error(e) => log::error!("buffer-graph: device error: {e}"),
            }
        }

        if self.transport.state.is_playing {
            let time = self.position();
            self.transport.state.current_time = time;
            self.transport.fire_time_update(time);
        }
    }

    fn destroy(&mut self) {
        if self.transport.lifecycle == Lifecycle::Destroyed {
            return;
        }
        self.transport.state.current_time = self.position();
        self.stop_voice();
        self.output = None;
        self.audio = None;
        self.transport.destroy();
    }
}
