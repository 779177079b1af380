//! Audio-thread side of playback. One voice plays at a time; starting a new
//! voice replaces the old one, and only the voice's own generation is named
//! in its `Ended` event, so a voice replaced by a seek can never end the
//! playback that replaced it.

use crossbeam_channel::Sender;

use super::stretcher::Stretcher;

/// Size of chunks fed into SoundTouch at a time.
const CHUNK_FRAMES: usize = 1024;

/// Interleaved PCM supplier for a voice.
pub trait FrameSource: Send {
    fn channels(&self) -> u16;

    /// Fill `out` with whole interleaved frames. `Some(0)` means no data is
    /// available yet; `None` means the source is exhausted.
    fn pull(&mut self, out: &mut [f32]) -> Option<usize>;
}

pub struct Voice {
    generation: u64,
    source: Box<dyn FrameSource>,
    stretcher: Stretcher,
    exhausted: bool,
}

impl Voice {
    pub fn new(generation: u64, source: Box<dyn FrameSource>, sample_rate: u32, tempo: f32) -> Self {
        let stretcher = Stretcher::new(sample_rate, source.channels(), tempo);
        Self {
            generation,
            source,
            stretcher,
            exhausted: false,
        }
    }
}

pub enum RenderCommand {
    Start(Voice),
    Stop,
    SetTempo(f32),
    SetVolume(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Ended { generation: u64 },
    Error(String),
}

pub struct Renderer {
    voice: Option<Voice>,
    tempo: f32,
    volume: f32,
    feed: Vec<f32>,
    recv: Vec<f32>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            voice: None,
            tempo: 1.0,
            volume: 1.0,
            feed: Vec::new(),
            recv: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.voice.is_some()
    }

    pub fn handle_command(&mut self, cmd: RenderCommand) {
        match cmd {
            RenderCommand::Start(mut voice) => {
                voice.stretcher.set_tempo(self.tempo);
                self.voice = Some(voice);
            }
            RenderCommand::Stop => self.voice = None,
            RenderCommand::SetTempo(tempo) => {
                self.tempo = tempo;
                if let Some(v) = &mut self.voice {
                    v.stretcher.set_tempo(tempo);
                }
            }
            RenderCommand::SetVolume(volume) => self.volume = volume,
        }
    }

    /// Fill the output buffer with the current voice, or silence.
    pub fn fill_buffer(&mut self, output: &mut [f32], channels: u16, events: &Sender<RenderEvent>) {
        let Some(voice) = &mut self.voice else {
            output.fill(0.0);
            return;
        };

        let src_channels = voice.source.channels().max(1) as usize;
        let out_channels = channels.max(1) as usize;
        let out_frames = output.len() / out_channels;
        let mut out_pos = 0;

        if self.recv.len() < out_frames * src_channels {
            self.recv.resize(out_frames * src_channels, 0.0);
        }
        if self.feed.len() < CHUNK_FRAMES * src_channels {
            self.feed.resize(CHUNK_FRAMES * src_channels, 0.0);
        }

        while out_pos < out_frames {
            let needed = out_frames - out_pos;
            let recv_slice = &mut self.recv[..needed * src_channels];
            let got_frames = voice.stretcher.receive_samples(recv_slice) / src_channels;

            if got_frames > 0 {
                for f in 0..got_frames {
                    for c in 0..out_channels {
                        output[(out_pos + f) * out_channels + c] =
                            recv_slice[f * src_channels + c % src_channels] * self.volume;
                    }
                }
                out_pos += got_frames;
                continue;
            }

            if voice.exhausted {
                let _ = events.send(RenderEvent::Ended {
                    generation: voice.generation,
                });
                self.voice = None;
                break;
            }

            match voice.source.pull(&mut self.feed[..CHUNK_FRAMES * src_channels]) {
                Some(0) => break,
                Some(frames) => voice.stretcher.put_samples(&self.feed[..frames * src_channels]),
                None => {
                    voice.stretcher.flush();
                    voice.exhausted = true;
                }
            }
        }

        output[out_pos * out_channels..].fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        remaining: usize,
    }

    impl FrameSource for Counter {
        fn channels(&self) -> u16 {
            1
        }

        fn pull(&mut self, out: &mut [f32]) -> Option<usize> {
            if self.remaining == 0 {
                return None;
            }
            let n = out.len().min(self.remaining);
            out[..n].fill(0.25);
            self.remaining -= n;
            Some(n)
        }
    }

    #[test]
    fn silent_without_voice() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut renderer = Renderer::new();
        let mut out = vec![1.0; 64];
        renderer.fill_buffer(&mut out, 2, &tx);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn exhausted_voice_reports_its_generation() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut renderer = Renderer::new();
        renderer.handle_command(RenderCommand::Start(Voice::new(
            7,
            Box::new(Counter { remaining: 4096 }),
            8_000,
            1.0,
        )));

        let mut out = vec![0.0; 512];
        for _ in 0..200 {
            renderer.fill_buffer(&mut out, 1, &tx);
            if !renderer.is_active() {
                break;
            }
        }
        assert!(!renderer.is_active());
        assert_eq!(rx.try_recv(), Ok(RenderEvent::Ended { generation: 7 }));
    }

    #[test]
    fn stop_drops_voice_without_ended() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut renderer = Renderer::new();
        renderer.handle_command(RenderCommand::Start(Voice::new(
            1,
            Box::new(Counter { remaining: 100_000 }),
            8_000,
            1.0,
        )));
        let mut out = vec![0.0; 256];
        renderer.fill_buffer(&mut out, 1, &tx);
        renderer.handle_command(RenderCommand::Stop);
        renderer.fill_buffer(&mut out, 1, &tx);
        assert!(rx.try_recv().is_err());
    }
}
