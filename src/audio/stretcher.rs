use soundtouch::SoundTouch;

/// SoundTouch wrapper: changes playback speed without shifting pitch.
pub struct Stretcher {
    st: SoundTouch,
    channels: u16,
}

impl Stretcher {
    pub fn new(sample_rate: u32, channels: u16, tempo: f32) -> Self {
        let mut st = SoundTouch::new();
        st.set_sample_rate(sample_rate);
        st.set_channels(channels as u32);
        st.set_tempo(tempo as f64);
        Stretcher { st, channels }
    }

    pub fn set_tempo(&mut self, tempo: f32) {
        self.st.set_tempo(tempo as f64);
    }

    /// Feed interleaved input samples.
    pub fn put_samples(&mut self, samples: &[f32]) {
        self.st
            .put_samples(samples, samples.len() / self.channels as usize);
    }

    /// Receive processed interleaved samples; returns the sample count
    /// written (all channels).
    pub fn receive_samples(&mut self, output: &mut [f32]) -> usize {
        let max_frames = output.len() / self.channels as usize;
        let received_frames = self.st.receive_samples(output, max_frames);
        received_frames * self.channels as usize
    }

    /// Push out whatever is still buffered once the input has ended.
    pub fn flush(&mut self) {
        self.st.flush();
    }
}
