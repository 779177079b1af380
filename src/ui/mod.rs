pub mod controls;
pub mod spectrogram;
