use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::types::AudioData;
use crate::error::DecodeError;

/// Format facts known without decoding the whole file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Seconds; 0.0 when the container does not record a frame count.
    pub duration: f64,
}

/// Interleaved frames starting at `first_frame` of the source.
pub struct Block {
    pub first_frame: u64,
    pub samples: Vec<f32>,
}

/// Packet-by-packet decoder over one file.
pub struct StreamReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    info: SourceInfo,
    frame: u64,
    skip_frames: u64,
}

impl StreamReader {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Probe(e.to_string()))?;

        let format = probed.format;
        let track = format.default_track().ok_or(DecodeError::NoTrack)?.clone();

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(DecodeError::NoSampleRate)?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let duration = track
            .codec_params
            .n_frames
            .map(|n| n as f64 / sample_rate as f64)
            .unwrap_or(0.0);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id: track.id,
            time_base: track.codec_params.time_base,
            info: SourceInfo {
                sample_rate,
                channels,
                duration,
            },
            frame: 0,
            skip_frames: 0,
        })
    }

    pub fn info(&self) -> SourceInfo {
        self.info
    }

    /// Position the reader so the next block starts at `seconds`.
    pub fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds.max(0.0)),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecodeError::Codec(format!("seek failed: {e}")))?;
        self.decoder.reset();

        let required = self.ts_to_frames(seeked.required_ts);
        let actual = self.ts_to_frames(seeked.actual_ts);
        self.frame = actual;
        self.skip_frames = required.saturating_sub(actual);
        Ok(())
    }

    /// Next decoded block, or `None` at end of stream.
    pub fn next_block(&mut self) -> Result<Option<Block>, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(symphonia::core::errors::Error::ResetRequired) => return Ok(None),
                Err(e) => return Err(DecodeError::Codec(format!("reading packet: {e}"))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    log::warn!("Decode warning: {e}");
                    continue;
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            let mut samples = sample_buf.samples();
            let frames = (samples.len() / channels) as u64;
            let skip = self.skip_frames.min(frames);
            self.skip_frames -= skip;
            self.frame += skip;
            samples = &samples[skip as usize * channels..];
            if samples.is_empty() {
                continue;
            }

            let block = Block {
                first_frame: self.frame,
                samples: samples.to_vec(),
            };
            self.frame += (samples.len() / channels) as u64;
            return Ok(Some(block));
        }
    }

    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let t = tb.calc_time(ts);
                ((t.seconds as f64 + t.frac) * self.info.sample_rate as f64).round() as u64
            }
            None => ts,
        }
    }
}

/// Read format facts, scanning the file when the container omits its length.
pub fn probe_file(path: &Path) -> Result<SourceInfo, DecodeError> {
    let mut reader = StreamReader::open(path)?;
    let mut info = reader.info();
    if info.duration <= 0.0 {
        let mut frames = 0u64;
        while let Some(block) = reader.next_block()? {
            frames += (block.samples.len() / info.channels.max(1) as usize) as u64;
        }
        info.duration = frames as f64 / info.sample_rate as f64;
    }
    Ok(info)
}

/// Decode an audio file into memory; sources wider than stereo are folded
/// down to two channels.
pub fn decode_file(path: &Path) -> Result<AudioData, DecodeError> {
    let mut reader = StreamReader::open(path)?;
    let info = reader.info();

    let mut samples: Vec<f32> = Vec::new();
    while let Some(block) = reader.next_block()? {
        samples.extend_from_slice(&block.samples);
    }

    let (samples, channels) = if info.channels > 2 {
        (fold_to_stereo(&samples, info.channels as usize), 2)
    } else {
        (samples, info.channels)
    };

    let audio = AudioData::new(samples, info.sample_rate, channels);
    log::info!(
        "Decoded {}: {:.2}s, {} Hz, {} ch",
        path.display(),
        audio.duration,
        audio.sample_rate,
        audio.channels
    );
    Ok(audio)
}

/// Even channels average into left, odd channels into right.
fn fold_to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    let lefts = channels.div_ceil(2) as f32;
    let rights = (channels / 2) as f32;
    samples
        .chunks_exact(channels)
        .flat_map(|frame| {
            let (mut l, mut r) = (0.0, 0.0);
            for (c, s) in frame.iter().enumerate() {
                if c % 2 == 0 {
                    l += s;
                } else {
                    r += s;
                }
            }
            [l / lefts, r / rights]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_surround_into_two_channels() {
        let frame = [1.0, 0.0, 1.0, 0.0, 1.0, 1.0];
        let folded = fold_to_stereo(&frame, 6);
        assert_eq!(folded.len(), 2);
        assert!((folded[0] - 1.0).abs() < 1e-6);
        assert!((folded[1] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = decode_file(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, DecodeError::Open(_)));
    }
}
