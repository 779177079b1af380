use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use super::params::SpectrogramParams;
use super::pool::WorkerPool;
use super::protocol::{ChunkResult, SpectrogramTask};
use crate::audio::types::AudioData;
use crate::error::TaskError;

/// Sources longer than this are split into segments of this length.
pub const SEGMENT_THRESHOLD_SECONDS: f64 = 30.0;

/// Upper bound on segments in flight for one request.
const MAX_CONCURRENT_SEGMENTS: usize = 4;

pub const POOL_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// The full-duration image assembled from one or more chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeImage {
    pub width: u32,
    pub height: u32,
    /// RGBA, rows top to bottom.
    pub pixels: Vec<u8>,
}

impl CompositeImage {
    /// Copy out the columns `[x0, x1)` as a standalone RGBA buffer.
    pub fn crop_columns(&self, x0: u32, x1: u32) -> (u32, Vec<u8>) {
        let x0 = x0.min(self.width);
        let x1 = x1.clamp(x0, self.width);
        let w = (x1 - x0) as usize;
        let stride = self.width as usize * 4;

        let mut out = Vec::with_capacity(w * self.height as usize * 4);
        for row in self.pixels.chunks_exact(stride) {
            out.extend_from_slice(&row[x0 as usize * 4..x1 as usize * 4]);
        }
        (w as u32, out)
    }
}

/// Contiguous sample ranges of at most `threshold_seconds` each; a single
/// range when the source fits under the threshold.
pub fn plan_segments(
    total_samples: usize,
    sample_rate: u32,
    threshold_seconds: f64,
) -> Vec<Range<usize>> {
    let segment_len = ((threshold_seconds * sample_rate as f64) as usize).max(1);
    if total_samples <= segment_len {
        return vec![0..total_samples];
    }
    (0..total_samples)
        .step_by(segment_len)
        .map(|start| start..(start + segment_len).min(total_samples))
        .collect()
}

/// Render a mono buffer through the pool, chunking long sources.
///
/// Segments go out in batches of at most `min(4, cores)`; each batch is
/// awaited in full before the next is sent. Results are placed by segment
/// index, never by the order in which workers finish.
pub async fn render_composite(
    pool: &WorkerPool,
    samples: &[f32],
    sample_rate: u32,
    params: &SpectrogramParams,
) -> Result<CompositeImage, TaskError> {
    let segments = plan_segments(samples.len(), sample_rate, SEGMENT_THRESHOLD_SECONDS);
    let max_concurrent = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_CONCURRENT_SEGMENTS);

    log::debug!(
        "Rendering {} samples in {} segment(s), {} at a time",
        samples.len(),
        segments.len(),
        max_concurrent
    );

    let mut results = Vec::with_capacity(segments.len());
    for (batch_index, batch) in segments.chunks(max_concurrent).enumerate() {
        let first = batch_index * max_concurrent;
        let handles: Vec<_> = batch
            .iter()
            .enumerate()
            .map(|(i, range)| {
                let task =
                    SpectrogramTask::new(samples[range.clone()].to_vec(), sample_rate, params.clone());
                (first + i, pool.submit(task))
            })
            .collect();

        for (index, handle) in handles {
            results.push((index, handle.result().await?));
        }
    }

    stitch(results)
}

/// Render a whole decoded source, mixed to mono. Waits for the pool to come
/// up first; a pool that misses the deadline still drains its queue later.
pub async fn render_audio(
    pool: Arc<WorkerPool>,
    audio: Arc<AudioData>,
    params: SpectrogramParams,
) -> Result<CompositeImage, TaskError> {
    if !pool.wait_for_ready(POOL_READY_TIMEOUT).await {
        log::warn!("Worker pool not ready after {POOL_READY_TIMEOUT:?}, queueing anyway");
    }
    let mono = audio.to_mono();
    render_composite(&pool, &mono, audio.sample_rate, &params).await
}

/// Lay chunks side by side in segment order.
pub fn stitch(mut chunks: Vec<(usize, ChunkResult)>) -> Result<CompositeImage, TaskError> {
    chunks.sort_by_key(|(index, _)| *index);

    let height = chunks.first().map(|(_, c)| c.height).unwrap_or(0);
    if let Some((index, bad)) = chunks.iter().find(|(_, c)| c.height != height) {
        return Err(TaskError::HeightMismatch {
            expected: height,
            found: bad.height,
            index: *index,
        });
    }

    let total_width: u32 = chunks.iter().map(|(_, c)| c.width).sum();
    let stride = total_width as usize * 4;
    let mut pixels = vec![0u8; stride * height as usize];

    let mut x_offset = 0usize;
    for (_, chunk) in &chunks {
        let chunk_stride = chunk.width as usize * 4;
        for row in 0..height as usize {
            let src = &chunk.pixels[row * chunk_stride..(row + 1) * chunk_stride];
            let dst = row * stride + x_offset * 4;
            pixels[dst..dst + chunk_stride].copy_from_slice(src);
        }
        x_offset += chunk.width as usize;
    }

    Ok(CompositeImage {
        width: total_width,
        height,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::transform::Transform;
    use std::sync::Arc;
    use std::time::Duration;

    fn solid(width: u32, height: u32, value: u8) -> ChunkResult {
        ChunkResult {
            width,
            height,
            pixels: vec![value; (width * height * 4) as usize],
        }
    }

    #[test]
    fn seventy_seconds_splits_into_three_segments() {
        let segments = plan_segments(70 * 16_000, 16_000, 30.0);
        let lengths: Vec<_> = segments.iter().map(|r| r.len()).collect();
        assert_eq!(lengths, vec![480_000, 480_000, 160_000]);
        assert_eq!(segments[1].start, 480_000);
        assert_eq!(segments[2].end, 70 * 16_000);
    }

    #[test]
    fn short_source_is_not_chunked() {
        assert_eq!(plan_segments(16_000, 16_000, 30.0), vec![0..16_000]);
        assert_eq!(plan_segments(0, 16_000, 30.0), vec![0..0]);
    }

    #[test]
    fn composite_width_is_sum_of_chunks() {
        let image = stitch(vec![
            (0, solid(100, 128, 1)),
            (1, solid(100, 128, 2)),
            (2, solid(40, 128, 3)),
        ])
        .unwrap();
        assert_eq!((image.width, image.height), (240, 128));
        assert_eq!(image.pixels.len(), 240 * 128 * 4);
    }

    #[test]
    fn stitch_orders_by_index_not_arrival() {
        let image = stitch(vec![(2, solid(1, 2, 30)), (0, solid(2, 2, 10)), (1, solid(1, 2, 20))])
            .unwrap();
        let first_row: Vec<u8> = image.pixels[..image.width as usize * 4]
            .chunks(4)
            .map(|px| px[0])
            .collect();
        assert_eq!(first_row, vec![10, 10, 20, 30]);
        // Second row is laid out identically.
        assert_eq!(image.pixels[4 * 4], 10);
        assert_eq!(image.pixels[7 * 4], 30);
    }

    #[test]
    fn mismatched_heights_are_rejected() {
        let err = stitch(vec![(0, solid(4, 8, 0)), (1, solid(4, 16, 0))]).unwrap_err();
        assert_eq!(
            err,
            TaskError::HeightMismatch {
                expected: 8,
                found: 16,
                index: 1
            }
        );
    }

    #[test]
    fn crop_extracts_column_range() {
        let image = stitch(vec![(0, solid(2, 3, 5)), (1, solid(3, 3, 9))]).unwrap();
        let (w, pixels) = image.crop_columns(1, 3);
        assert_eq!(w, 2);
        assert_eq!(pixels.len(), 2 * 3 * 4);
        assert_eq!(&pixels[..8], &[5, 5, 5, 5, 9, 9, 9, 9]);
    }

    /// One column per second of audio, brightness = segment number; earlier
    /// segments take longer so completion order is reversed.
    struct Slow;

    impl Transform for Slow {
        fn render(
            &self,
            samples: &[f32],
            sample_rate: u32,
            _params: &SpectrogramParams,
        ) -> Result<ChunkResult, TaskError> {
            let tag = samples[0];
            std::thread::sleep(Duration::from_millis((40.0 - tag * 10.0).max(0.0) as u64));
            let width = (samples.len() / sample_rate as usize) as u32;
            Ok(solid(width, 1, tag as u8))
        }
    }

    #[tokio::test]
    async fn chunked_render_preserves_temporal_order() {
        let sample_rate = 16_000;
        let mut samples = vec![0.0f32; 70 * sample_rate as usize];
        for (i, seg) in plan_segments(samples.len(), sample_rate, SEGMENT_THRESHOLD_SECONDS)
            .into_iter()
            .enumerate()
        {
            samples[seg].fill(i as f32 + 1.0);
        }

        let pool = WorkerPool::new(3, Arc::new(Slow)).unwrap();
        let image = render_composite(&pool, &samples, sample_rate, &SpectrogramParams::default())
            .await
            .unwrap();

        assert_eq!(image.width, 70);
        let tags: Vec<u8> = image.pixels.chunks(4).map(|px| px[0]).collect();
        assert!(tags[..30].iter().all(|&t| t == 1));
        assert!(tags[30..60].iter().all(|&t| t == 2));
        assert!(tags[60..].iter().all(|&t| t == 3));
    }

    #[tokio::test]
    async fn whole_source_is_mixed_to_mono_first() {
        // Left 2.0, right 0.0: the mono mix tags the only segment with 1.
        let sample_rate = 1_000;
        let samples = [2.0f32, 0.0].repeat(5 * sample_rate as usize);
        let audio = Arc::new(AudioData::new(samples, sample_rate, 2));

        let pool = Arc::new(WorkerPool::new(1, Arc::new(Slow)).unwrap());
        let image = render_audio(pool, audio, SpectrogramParams::default())
            .await
            .unwrap();

        assert_eq!((image.width, image.height), (5, 1));
        assert!(image.pixels.chunks(4).all(|px| px[0] == 1));
    }
}
