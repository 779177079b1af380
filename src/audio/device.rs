use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::decoder::{self, Block, SourceInfo, StreamReader};
use super::engine::{EndedCallback, Lifecycle, PlaybackEngine, TimeUpdateCallback, Transport};
use super::output::{OutputFactory, OutputHandle};
use super::render::{FrameSource, RenderCommand, RenderEvent, Voice};
use super::types::{EngineEvent, PlaybackState};
use crate::error::EngineError;
use crate::events::Subscription;

/// Decoded blocks buffered ahead of the device.
const READ_AHEAD_BLOCKS: usize = 16;

/// Frames arriving from a decode thread. Publishes how far into the file
/// the device has consumed, which is the backend's native position.
struct StreamSource {
    blocks: Receiver<Block>,
    current: Option<Block>,
    offset: usize,
    channels: u16,
    position: Arc<AtomicU64>,
}

impl FrameSource for StreamSource {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn pull(&mut self, out: &mut [f32]) -> Option<usize> {
        let ch = self.channels as usize;
        let want = out.len() / ch;
        let mut written = 0;

        while written < want {
            if self.current.is_none() {
                match self.blocks.try_recv() {
                    Ok(block) => {
                        self.current = Some(block);
                        self.offset = 0;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return if written > 0 { Some(written) } else { None };
                    }
                }
            }
            let Some(block) = &self.current else {
                break;
            };

            let available = block.samples.len() / ch - self.offset;
            let n = available.min(want - written);
            let src = &block.samples[self.offset * ch..(self.offset + n) * ch];
            out[written * ch..(written + n) * ch].copy_from_slice(src);
            written += n;
            self.offset += n;
            self.position
                .store(block.first_frame + self.offset as u64, Ordering::Relaxed);

            if self.offset * ch >= block.samples.len() {
                self.current = None;
            }
        }
        Some(written)
    }
}

/// Decode `path` from `start` seconds into `tx` until the file ends or the
/// receiving voice is dropped.
fn stream_file(path: PathBuf, start: f64, looping: Arc<AtomicBool>, tx: Sender<Block>) {
    let mut reader = match StreamReader::open(&path) {
        Ok(r) => r,
        Err(e) => {
            log::error!("device: cannot open {}: {e}", path.display());
            return;
        }
    };
    if start > 0.0 {
        if let Err(e) = reader.seek(start) {
            log::error!("device: {e}");
            return;
        }
    }

    loop {
        match reader.next_block() {
            Ok(Some(block)) => {
                if tx.send(block).is_err() {
                    return;
                }
            }
            Ok(None) if looping.load(Ordering::Relaxed) => {
                if let Err(e) = reader.seek(0.0) {
                    log::error!("device: loop restart failed: {e}");
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                log::error!("device: {e}");
                return;
            }
        }
    }
}

/// Backend that streams a file to the device. It never holds the whole
/// decode, so it cannot feed the analysis pipeline.
pub struct DeviceEngine {
    transport: Transport,
    factory: Box<dyn OutputFactory>,
    path: PathBuf,
    output: Option<OutputHandle>,
    info: Option<SourceInfo>,
    generation: u64,
    position: Arc<AtomicU64>,
    paused_at: f64,
    looping: Arc<AtomicBool>,
}

impl DeviceEngine {
    pub fn new(path: PathBuf, factory: Box<dyn OutputFactory>) -> Self {
        Self {
            transport: Transport::new("device"),
            factory,
            path,
            output: None,
            info: None,
            generation: 0,
            position: Arc::new(AtomicU64::new(0)),
            paused_at: 0.0,
            looping: Arc::new(AtomicBool::new(false)),
        }
    }

    fn native_position(&self) -> f64 {
        let rate = self.info.map(|i| i.sample_rate).unwrap_or(1).max(1);
        let seconds = self.position.load(Ordering::Relaxed) as f64 / rate as f64;
        self.transport.clamp_time(seconds)
    }

    fn start_voice(&mut self, from: f64) -> Result<(), EngineError> {
        let (Some(output), Some(info)) = (&self.output, self.info) else {
            return Err(EngineError::NoAudioLoaded);
        };

        let (tx, rx) = crossbeam_channel::bounded::<Block>(READ_AHEAD_BLOCKS);
        let path = self.path.clone();
        let looping = Arc::clone(&self.looping);
        std::thread::Builder::new()
            .name("device-stream".into())
            .spawn(move || stream_file(path, from, looping, tx))
            .map_err(|e| EngineError::Stream(format!("Failed to spawn stream thread: {e}")))?;

        self.generation += 1;
        self.position = Arc::new(AtomicU64::new((from * info.sample_rate as f64) as u64));
        let source = StreamSource {
            blocks: rx,
            current: None,
            offset: 0,
            channels: info.channels,
            position: Arc::clone(&self.position),
        };
        let voice = Voice::new(
            self.generation,
            Box::new(source),
            info.sample_rate,
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

impl PlaybackEngine for DeviceEngine {
    fn initialize(&mut self) -> Result<(), EngineError> {
        let factory = &self.factory;
        let output = &mut self.output;
        let path = &self.path;
        let mut probed = None;

        let result = self.transport.initialize_with(|| {
            let info = decoder::probe_file(path)?;
            *output = Some(factory.open(info.sample_rate, info.channels)?);
            probed = Some(info);
            Ok(())
        });
        if let Some(info) = probed {
            log::info!(
                "device: {} at {} Hz, {} ch, {:.2}s",
                self.path.display(),
                info.sample_rate,
                info.channels,
                info.duration
            );
            self.info = Some(info);
            self.transport.state.duration = info.duration;
        }
        result
    }

    fn play(&mut self, start_from: Option<f64>) -> bool {
        if !self.transport.usable("play") {
            return false;
        }
        if let Some(t) = start_from {
            self.seek(t);
        }
        if self.transport.state.is_playing {
            return true;
        }

        let mut from = self.paused_at;
        if from >= self.transport.state.duration {
            from = 0.0;
        }
        if let Err(e) = self.start_voice(from) {
            log::warn!("device: play failed: {e}");
            return false;
        }
        self.transport.set_playing(true);
        true
    }

    fn pause(&mut self) {
        if !self.transport.usable("pause") || !self.transport.state.is_playing {
            return;
        }
        self.paused_at = self.native_position();
        self.stop_voice();
        self.transport.state.current_time = self.paused_at;
        self.transport.set_playing(false);
    }

    fn seek(&mut self, time: f64) {
        if !self.transport.usable("seek") {
            return;
        }
        let time = self.transport.clamp_time(time);
        self.paused_at = time;
        self.transport.state.current_time = time;

        if self.transport.state.is_playing {
            if let Err(e) = self.start_voice(time) {
                log::warn!("device: restart after seek failed: {e}");
                self.stop_voice();
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
            log::warn!("device: ignoring playback rate {rate}");
            return;
        }
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
        if self.transport.state.is_playing {
            self.native_position()
        } else {
            self.paused_at
        }
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
                        self.paused_at = self.transport.state.duration;
                        self.transport.state.current_time = self.paused_at;
                        self.transport.fire_ended();
                    }
                }
                RenderEvent::Ended { .. } => {}
                RenderEvent::Error(e) => log::error!("device: stream error: {e}"),
            }
        }

        if self.transport.state.is_playing {
            let time = self.native_position();
            self.transport.state.current_time = time;
            self.transport.fire_time_update(time);
        }
    }

    fn destroy(&mut self) {
        if self.transport.lifecycle == Lifecycle::Destroyed {
            return;
        }
        self.stop_voice();
        self.output = None;
        self.transport.destroy();
    }
}
