//! Messages exchanged between the pool dispatcher and its workers.
//!
//! Buffers inside these messages are moved, never shared: once a request is
//! sent the dispatcher no longer owns its samples, and a worker gives up its
//! pixel buffer when it reports completion.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::params::SpectrogramParams;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One unit of work: a slice of mono samples and how to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramTask {
    pub id: TaskId,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub params: SpectrogramParams,
}

impl SpectrogramTask {
    pub fn new(samples: Vec<f32>, sample_rate: u32, params: SpectrogramParams) -> Self {
        Self {
            id: TaskId::next(),
            samples,
            sample_rate,
            params,
        }
    }

    pub(crate) fn into_request(self) -> WorkerRequest {
        WorkerRequest::ProcessChunk {
            id: self.id,
            data: ChunkPayload {
                sample_slice: self.samples,
                sample_rate: self.sample_rate,
                params: self.params,
            },
        }
    }
}

/// RGBA image for one chunk, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    pub width: u32,
    pub height: u32,
    #[serde(rename = "pixelBuffer")]
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub sample_slice: Vec<f32>,
    pub sample_rate: u32,
    pub params: SpectrogramParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    ProcessChunk { id: TaskId, data: ChunkPayload },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// Startup announcement; `id` is the announcing worker's slot.
    Ready { id: usize },
    ChunkComplete { id: TaskId, data: ChunkResult },
    Error { id: TaskId, error: String },
    Log { data: LogRecord },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        let a = SpectrogramTask::new(vec![], 16_000, SpectrogramParams::default());
        let b = SpectrogramTask::new(vec![], 16_000, SpectrogramParams::default());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn wire_shape_uses_type_tags() {
        let request = SpectrogramTask {
            id: TaskId(7),
            samples: vec![0.5],
            sample_rate: 16_000,
            params: SpectrogramParams::default(),
        }
        .into_request();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "process_chunk");
        assert_eq!(json["id"], 7);
        assert_eq!(json["data"]["sampleRate"], 16_000);
        assert_eq!(json["data"]["params"]["fftSize"], 2048);

        let done = WorkerResponse::ChunkComplete {
            id: TaskId(7),
            data: ChunkResult {
                width: 1,
                height: 1,
                pixels: vec![1, 2, 3, 4],
            },
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "chunk_complete");
        assert_eq!(json["data"]["pixelBuffer"][3], 4);

        let log = WorkerResponse::Log {
            data: LogRecord {
                source: "worker-0".into(),
                message: "hi".into(),
            },
        };
        assert_eq!(serde_json::to_value(&log).unwrap()["type"], "log");
    }
}
