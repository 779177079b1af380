use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use super::clock::{DeviceClock, StreamClock};
use super::render::{RenderCommand, RenderEvent, Renderer};
use crate::error::EngineError;

/// Control-thread end of an open output stream. Dropping it closes the stream.
pub struct OutputHandle {
    pub commands: Sender<RenderCommand>,
    pub events: Receiver<RenderEvent>,
    pub clock: Arc<dyn DeviceClock>,
    pub sample_rate: u32,
    pub channels: u16,
    _shutdown: Sender<()>,
}

impl OutputHandle {
    pub fn new(
        commands: Sender<RenderCommand>,
        events: Receiver<RenderEvent>,
        clock: Arc<dyn DeviceClock>,
        sample_rate: u32,
        channels: u16,
        shutdown: Sender<()>,
    ) -> Self {
        Self {
            commands,
            events,
            clock,
            sample_rate,
            channels,
            _shutdown: shutdown,
        }
    }

    pub fn send(&self, cmd: RenderCommand) -> Result<(), EngineError> {
        self.commands
            .send(cmd)
            .map_err(|_| EngineError::Stream("output stream has stopped".into()))
    }
}

/// Opens output streams for an engine.
pub trait OutputFactory: Send {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<OutputHandle, EngineError>;
}

/// The default output device via cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl OutputFactory for CpalOutput {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<OutputHandle, EngineError> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<RenderCommand>(64);
        let (event_tx, event_rx) = crossbeam_channel::bounded::<RenderEvent>(256);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(EngineError::NoOutputDevice)?;

        // Prefer a config at the source rate so no resampling is needed.
        let matching = device
            .supported_output_configs()
            .map_err(|e| EngineError::OutputConfig(e.to_string()))?
            .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
            .filter(|c| c.min_sample_rate() <= sample_rate && sample_rate <= c.max_sample_rate())
            .max_by_key(|c| c.channels() == channels)
            .map(|c| c.with_sample_rate(sample_rate));

        let config = match matching {
            Some(config) => config,
            None => {
                let config = device
                    .default_output_config()
                    .map_err(|e| EngineError::OutputConfig(e.to_string()))?;
                log::warn!(
                    "Device cannot run at {sample_rate} Hz, using {} Hz; playback speed will be off",
                    config.sample_rate()
                );
                config
            }
        };

        let out_rate = config.sample_rate();
        let out_channels = config.channels();
        let sample_format = config.sample_format();
        if sample_format != cpal::SampleFormat::F32 {
            return Err(EngineError::OutputConfig(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }

        let frames = Arc::new(AtomicU64::new(0));
        let frames_cb = Arc::clone(&frames);
        let event_tx_err = event_tx.clone();
        let mut renderer = Renderer::new();

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    while let Ok(cmd) = cmd_rx.try_recv() {
                        renderer.handle_command(cmd);
                    }
                    renderer.fill_buffer(data, out_channels, &event_tx);
                    frames_cb.fetch_add(
                        (data.len() / out_channels.max(1) as usize) as u64,
                        Ordering::Relaxed,
                    );
                },
                move |err| {
                    log::error!("Audio stream error: {err}");
                    let _ = event_tx_err.try_send(RenderEvent::Error(err.to_string()));
                },
                None,
            )
            .map_err(|e| EngineError::Stream(format!("Failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| EngineError::Stream(format!("Failed to start stream: {e}")))?;

        // The stream lives until the handle's shutdown sender is dropped.
        std::thread::Builder::new()
            .name("audio-keepalive".into())
            .spawn(move || {
                let _stream = stream;
                let _ = shutdown_rx.recv();
            })
            .map_err(|e| EngineError::Stream(format!("Failed to spawn keepalive thread: {e}")))?;

        log::info!("Opened output stream: {out_rate} Hz, {out_channels} ch");

        Ok(OutputHandle::new(
            cmd_tx,
            event_rx,
            Arc::new(StreamClock::new(frames, out_rate)),
            out_rate,
            out_channels,
            shutdown_tx,
        ))
    }
}

#[cfg(test)]
pub mod testing {
    //! An output with no device behind it. Tests read the commands an engine
    //! sends and inject render events by hand.

    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::audio::clock::ManualClock;

    #[derive(Clone, Default)]
    pub struct DetachedOutput {
        pub clock: ManualClock,
        inner: Arc<Mutex<Option<Wires>>>,
        pub fail_open: bool,
    }

    struct Wires {
        commands: Receiver<RenderCommand>,
        events: Sender<RenderEvent>,
    }

    impl DetachedOutput {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail_open: true,
                ..Self::default()
            }
        }

        /// Commands sent to the most recently opened stream.
        pub fn take_commands(&self) -> Vec<RenderCommand> {
            let guard = self.inner.lock().unwrap();
            guard
                .as_ref()
                .map(|w| w.commands.try_iter().collect())
                .unwrap_or_default()
        }

        pub fn inject(&self, event: RenderEvent) {
            let guard = self.inner.lock().unwrap();
            guard.as_ref().unwrap().events.send(event).unwrap();
        }
    }

    impl OutputFactory for DetachedOutput {
        fn open(&self, sample_rate: u32, channels: u16) -> Result<OutputHandle, EngineError> {
            if self.fail_open {
                return Err(EngineError::NoOutputDevice);
            }
            let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
            let (event_tx, event_rx) = crossbeam_channel::unbounded();
            let (shutdown_tx, _) = crossbeam_channel::bounded(0);
            *self.inner.lock().unwrap() = Some(Wires {
                commands: cmd_rx,
                events: event_tx,
            });
            Ok(OutputHandle::new(
                cmd_tx,
                event_rx,
                Arc::new(self.clock.clone()),
                sample_rate,
                channels,
                shutdown_tx,
            ))
        }
    }
}
