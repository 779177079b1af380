use realfft::RealFftPlanner;

use super::colormap::{ColorLut, Colormap};
use super::params::SpectrogramParams;
use super::protocol::ChunkResult;
use crate::error::TaskError;

/// Converts a mono sample slice into a colorized time-frequency image.
pub trait Transform: Send + Sync + 'static {
    fn render(
        &self,
        samples: &[f32],
        sample_rate: u32,
        params: &SpectrogramParams,
    ) -> Result<ChunkResult, TaskError>;
}

/// Short-time Fourier transform folded onto a mel filterbank.
///
/// Each hop produces one image column, so widths of consecutive slices add up
/// to the width of the whole. Levels are absolute (0 dB is a full-scale sine)
/// so separately rendered slices stitch without visible seams.
#[derive(Debug, Default, Clone, Copy)]
pub struct MelSpectrogram;

impl Transform for MelSpectrogram {
    fn render(
        &self,
        samples: &[f32],
        sample_rate: u32,
        params: &SpectrogramParams,
    ) -> Result<ChunkResult, TaskError> {
        params.validate(sample_rate)?;
        let colormap = Colormap::from_name(&params.colormap_name).ok_or_else(|| {
            TaskError::InvalidParams(format!("unknown colormap '{}'", params.colormap_name))
        })?;
        let lut = ColorLut::new(colormap, params.transparent);

        let n_fft = params.fft_size;
        let hop = params.hop_length;
        let width = samples.len().div_ceil(hop).max(1);
        let height = params.mel_bins;

        let window = hann(params.window_length);
        let window_sum: f32 = window.iter().sum();
        let filters = mel_filterbank(sample_rate, n_fft, params);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);
        let mut input = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();
        let mut power = vec![0.0f32; spectrum.len()];

        let mut pixels = vec![0u8; width * height * 4];

        for col in 0..width {
            let start = col * hop;
            input.fill(0.0);
            for (i, w) in window.iter().enumerate() {
                if let Some(&s) = samples.get(start + i) {
                    input[i] = s * w;
                }
            }

            fft.process(&mut input, &mut spectrum)
                .map_err(|e| TaskError::Transform(e.to_string()))?;

            for (p, c) in power.iter_mut().zip(spectrum.iter()) {
                let amplitude = 2.0 * c.norm() / window_sum;
                *p = amplitude * amplitude;
            }

            for (bin, filter) in filters.iter().enumerate() {
                let energy: f32 = filter.iter().map(|&(k, w)| power[k] * w).sum();
                let db = 10.0 * energy.max(1e-12).log10();
                let t = (db + params.dynamic_range_db) / params.dynamic_range_db;

                // Row 0 is the top of the image, i.e. the highest band.
                let row = height - 1 - bin;
                let offset = (row * width + col) * 4;
                pixels[offset..offset + 4].copy_from_slice(&lut.lookup(t));
            }
        }

        Ok(ChunkResult {
            width: width as u32,
            height: height as u32,
            pixels,
        })
    }
}

fn hann(len: usize) -> Vec<f32> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|i| {
            let x = std::f32::consts::TAU * i as f32 / (len - 1) as f32;
            0.5 - 0.5 * x.cos()
        })
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Sparse triangular filters, one per mel band, as (fft bin, weight) pairs.
fn mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    params: &SpectrogramParams,
) -> Vec<Vec<(usize, f32)>> {
    let num_bins = n_fft / 2 + 1;
    let bin_hz = sample_rate as f32 / n_fft as f32;
    let f_max = params.f_max.min(sample_rate as f32 / 2.0);

    let mel_lo = hz_to_mel(params.f_min);
    let mel_hi = hz_to_mel(f_max);
    let edges: Vec<f32> = (0..params.mel_bins + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f32 / (params.mel_bins + 1) as f32))
        .collect();

    (0..params.mel_bins)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            let mut filter: Vec<(usize, f32)> = (0..num_bins)
                .filter_map(|k| {
                    let f = k as f32 * bin_hz;
                    let w = if f > lo && f <= center {
                        (f - lo) / (center - lo)
                    } else if f > center && f < hi {
                        (hi - f) / (hi - center)
                    } else {
                        0.0
                    };
                    (w > 0.0).then_some((k, w))
                })
                .collect();

            // Narrower than one FFT bin: sample the nearest bin instead.
            if filter.is_empty() {
                let k = ((center / bin_hz).round() as usize).min(num_bins - 1);
                filter.push((k, 1.0));
            }
            filter
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (std::f32::consts::TAU * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn greys(mel_bins: usize) -> SpectrogramParams {
        SpectrogramParams {
            fft_size: 1024,
            window_length: 1024,
            hop_length: 256,
            f_min: 0.0,
            f_max: 8000.0,
            mel_bins,
            colormap_name: "greys".into(),
            ..Default::default()
        }
    }

    #[test]
    fn one_column_per_hop() {
        let samples = sine(440.0, 16_000, 1.0);
        let out = MelSpectrogram.render(&samples, 16_000, &greys(64)).unwrap();
        assert_eq!(out.width, 16_000u32.div_ceil(256));
        assert_eq!(out.height, 64);
        assert_eq!(out.pixels.len(), (out.width * out.height * 4) as usize);
    }

    #[test]
    fn tone_is_brightest_near_its_band() {
        let samples = sine(1000.0, 16_000, 0.5);
        let params = greys(32);
        let out = MelSpectrogram.render(&samples, 16_000, &params).unwrap();

        let col = (out.width / 2) as usize;
        let brightest_row = (0..out.height as usize)
            .max_by_key(|&row| out.pixels[(row * out.width as usize + col) * 4])
            .unwrap();
        let band = out.height as usize - 1 - brightest_row;

        let mel_1k = hz_to_mel(1000.0);
        let mel_top = hz_to_mel(8000.0);
        let expected = (mel_1k / mel_top * 33.0) as usize;
        assert!(band.abs_diff(expected) <= 2, "band {band}, expected ~{expected}");
    }

    #[test]
    fn unknown_colormap_is_a_parameter_error() {
        let params = SpectrogramParams {
            colormap_name: "plasma-ish".into(),
            ..Default::default()
        };
        let err = MelSpectrogram.render(&[0.0; 4096], 16_000, &params).unwrap_err();
        assert!(matches!(err, TaskError::InvalidParams(_)));
    }

    #[test]
    fn empty_slice_yields_one_silent_column() {
        let out = MelSpectrogram.render(&[], 16_000, &greys(8)).unwrap();
        assert_eq!(out.width, 1);
        assert!(out.pixels.chunks(4).all(|px| px[0] == 0));
    }
}
