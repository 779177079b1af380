use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Parameters consumed by the transform for one spectrogram request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpectrogramParams {
    /// Transform window size in samples.
    pub fft_size: usize,
    /// Analysis window in samples, at most `fft_size`.
    pub window_length: usize,
    /// Stride between analysis windows.
    pub hop_length: usize,
    pub f_min: f32,
    pub f_max: f32,
    /// Output frequency resolution (image height).
    pub mel_bins: usize,
    /// Clip range below the loudest bin, in dB.
    pub dynamic_range_db: f32,
    pub colormap_name: String,
    /// Map quiet bins to low alpha instead of the palette background.
    pub transparent: bool,
}

impl Default for SpectrogramParams {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            window_length: 2048,
            hop_length: 512,
            f_min: 0.0,
            f_max: 8000.0,
            mel_bins: 128,
            dynamic_range_db: 80.0,
            colormap_name: "viridis".to_string(),
            transparent: false,
        }
    }
}

impl SpectrogramParams {
    pub fn validate(&self, sample_rate: u32) -> Result<(), TaskError> {
        let invalid = |msg: String| Err(TaskError::InvalidParams(msg));

        if sample_rate == 0 {
            return invalid("sample rate must be positive".into());
        }
        if self.fft_size < 16 {
            return invalid(format!("fftSize {} is too small", self.fft_size));
        }
        if self.window_length == 0 || self.window_length > self.fft_size {
            return invalid(format!(
                "windowLength {} must be in 1..={}",
                self.window_length, self.fft_size
            ));
        }
        if self.hop_length == 0 {
            return invalid("hopLength must be positive".into());
        }
        if self.mel_bins == 0 {
            return invalid("melBins must be positive".into());
        }
        let nyquist = sample_rate as f32 / 2.0;
        if !(self.f_min >= 0.0 && self.f_min < self.f_max) {
            return invalid(format!(
                "frequency band {}..{} Hz is empty",
                self.f_min, self.f_max
            ));
        }
        if self.f_min >= nyquist {
            return invalid(format!(
                "fMin {} Hz is above Nyquist ({nyquist} Hz)",
                self.f_min
            ));
        }
        if !(self.dynamic_range_db > 0.0) {
            return invalid("dynamicRangeDb must be positive".into());
        }
        Ok(())
    }
}
