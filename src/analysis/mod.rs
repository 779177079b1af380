//! Audio to time-frequency image pipeline: a worker pool running the
//! transform on bounded segments, stitched back into one composite.

pub mod chunker;
pub mod colormap;
pub mod params;
pub mod pool;
pub mod protocol;
pub mod transform;

pub use chunker::CompositeImage;
pub use params::SpectrogramParams;
pub use pool::{PoolCache, WorkerPool};
pub use transform::MelSpectrogram;
