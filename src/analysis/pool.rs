//! Fixed-size pool of transform workers.
//!
//! Each worker is a thread with its own inbox; it only ever sees the
//! requests addressed to it and answers through the shared control channel.
//! All bookkeeping (idle list, FIFO queue, pending replies) lives on a single
//! dispatcher thread, so none of it needs a lock.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::{oneshot, watch};

use super::protocol::{ChunkResult, LogRecord, SpectrogramTask, TaskId, WorkerRequest, WorkerResponse};
use super::transform::Transform;
use crate::error::TaskError;

type Reply = oneshot::Sender<Result<ChunkResult, TaskError>>;

/// Pool size for this machine: one worker per core, capped.
pub fn default_pool_size(hard_cap: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(hard_cap)
        .max(1)
}

enum Control {
    Submit { task: SpectrogramTask, reply: Reply },
    Worker { slot: usize, generation: u64, response: WorkerResponse },
    Faulted { slot: usize, generation: u64, message: String },
    Shutdown,
}

/// Awaitable result of one submitted task.
pub struct TaskHandle {
    rx: oneshot::Receiver<Result<ChunkResult, TaskError>>,
}

impl TaskHandle {
    pub async fn result(self) -> Result<ChunkResult, TaskError> {
        self.rx.await.unwrap_or(Err(TaskError::PoolClosed))
    }
}

pub struct WorkerPool {
    control_tx: Sender<Control>,
    ready_rx: watch::Receiver<usize>,
    size: usize,
    dispatcher: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize, transform: Arc<dyn Transform>) -> std::io::Result<Self> {
        let size = size.max(1);
        let (control_tx, control_rx) = crossbeam_channel::unbounded::<Control>();
        let (ready_tx, ready_rx) = watch::channel(0usize);

        let mut dispatcher = Dispatcher {
            workers: Vec::with_capacity(size),
            idle: Vec::with_capacity(size),
            queue: VecDeque::new(),
            pending: HashMap::new(),
            transform,
            control_tx: control_tx.clone(),
            ready_tx,
        };
        for slot in 0..size {
            let worker = dispatcher.spawn_worker(slot, 0)?;
            dispatcher.workers.push(worker);
        }

        let handle = std::thread::Builder::new()
            .name("spectro-dispatch".into())
            .spawn(move || dispatcher.run(control_rx))?;

        log::info!("Worker pool started with {size} workers");

        Ok(Self {
            control_tx,
            ready_rx,
            size,
            dispatcher: Some(handle),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task. The handle resolves when a worker finishes it; invalid
    /// parameters are rejected here without reaching a worker.
    pub fn submit(&self, task: SpectrogramTask) -> TaskHandle {
        let id = task.id;
        let (reply, rx) = oneshot::channel();

        if let Err(e) = task.params.validate(task.sample_rate) {
            log::debug!("Rejected {id}: {e}");
            let _ = reply.send(Err(e));
        } else if let Err(crossbeam_channel::SendError(Control::Submit { reply, .. })) =
            self.control_tx.send(Control::Submit { task, reply })
        {
            let _ = reply.send(Err(TaskError::PoolClosed));
        }

        TaskHandle { rx }
    }

    /// Resolves `true` once at least one worker has announced readiness.
    /// Tasks submitted earlier are queued and flushed as workers come up.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready_rx.clone();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|&ready| ready > 0)).await,
            Ok(Ok(_))
        );
        ready
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Shutdown);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

/// Opt-in reuse of one pool across players: hands out the live pool while
/// anyone still holds it, otherwise builds a fresh one.
#[derive(Default)]
pub struct PoolCache {
    slot: Mutex<Weak<WorkerPool>>,
}

impl PoolCache {
    pub fn get_or_spawn(
        &self,
        size: usize,
        transform: Arc<dyn Transform>,
    ) -> std::io::Result<Arc<WorkerPool>> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pool) = slot.upgrade() {
            return Ok(pool);
        }
        let pool = Arc::new(WorkerPool::new(size, transform)?);
        *slot = Arc::downgrade(&pool);
        Ok(pool)
    }
}

struct WorkerSlot {
    tx: Sender<WorkerRequest>,
    generation: u64,
    in_flight: Option<TaskId>,
}

struct Dispatcher {
    workers: Vec<WorkerSlot>,
    idle: Vec<usize>,
    queue: VecDeque<SpectrogramTask>,
    pending: HashMap<TaskId, Reply>,
    transform: Arc<dyn Transform>,
    control_tx: Sender<Control>,
    ready_tx: watch::Sender<usize>,
}

impl Dispatcher {
    fn run(mut self, control_rx: Receiver<Control>) {
        while let Ok(msg) = control_rx.recv() {
            match msg {
                Control::Submit { task, reply } => {
                    self.pending.insert(task.id, reply);
                    self.queue.push_back(task);
                    self.pump();
                }
                Control::Worker {
                    slot,
                    generation,
                    response,
                } => {
                    if self.workers[slot].generation == generation {
                        self.on_response(slot, response);
                    }
                }
                Control::Faulted {
                    slot,
                    generation,
                    message,
                } => {
                    if self.workers[slot].generation == generation {
                        self.on_fault(slot, &message);
                    }
                }
                Control::Shutdown => break,
            }
        }
        log::debug!(
            "Worker pool dispatcher exiting, abandoning {} queued tasks",
            self.queue.len()
        );
    }

    fn on_response(&mut self, slot: usize, response: WorkerResponse) {
        match response {
            WorkerResponse::Ready { .. } => {
                self.ready_tx.send_modify(|n| *n += 1);
                self.release(slot);
            }
            WorkerResponse::ChunkComplete { id, data } => {
                self.resolve(id, Ok(data));
                self.release(slot);
            }
            WorkerResponse::Error { id, error } => {
                self.resolve(id, Err(TaskError::Transform(error)));
                self.release(slot);
            }
            WorkerResponse::Log {
                data: LogRecord { source, message },
            } => {
                log::debug!("[{source}] {message}");
            }
        }
    }

    fn on_fault(&mut self, slot: usize, message: &str) {
        log::warn!("Worker {slot} faulted: {message}; replacing it");
        self.idle.retain(|&s| s != slot);
        self.ready_tx.send_modify(|n| *n = n.saturating_sub(1));

        // The replacement never sees the orphaned task, so fail it here
        // rather than leave its caller waiting forever.
        if let Some(id) = self.workers[slot].in_flight.take() {
            self.resolve(id, Err(TaskError::WorkerFault { worker: slot }));
        }

        let generation = self.workers[slot].generation + 1;
        match self.spawn_worker(slot, generation) {
            Ok(worker) => self.workers[slot] = worker,
            Err(e) => {
                log::error!("Failed to replace worker {slot}: {e}");
                self.workers[slot].generation = generation;
            }
        }
    }

    fn resolve(&mut self, id: TaskId, result: Result<ChunkResult, TaskError>) {
        if let Some(reply) = self.pending.remove(&id) {
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
    }

    fn release(&mut self, slot: usize) {
        self.workers[slot].in_flight = None;
        if !self.idle.contains(&slot) {
            self.idle.push(slot);
        }
        self.pump();
    }

    /// Hand queued tasks to idle workers, oldest first.
    fn pump(&mut self) {
        while !self.queue.is_empty() {
            let Some(slot) = self.idle.pop() else {
                return;
            };
            let Some(task) = self.queue.pop_front() else {
                return;
            };
            let id = task.id;
            self.workers[slot].in_flight = Some(id);
            if self.workers[slot].tx.send(task.into_request()).is_err() {
                let generation = self.workers[slot].generation;
                let _ = self.control_tx.send(Control::Faulted {
                    slot,
                    generation,
                    message: "worker inbox closed".into(),
                });
            }
        }
    }

    fn spawn_worker(&self, slot: usize, generation: u64) -> std::io::Result<WorkerSlot> {
        let (tx, rx) = crossbeam_channel::unbounded::<WorkerRequest>();
        let control_tx = self.control_tx.clone();
        let transform = Arc::clone(&self.transform);

        std::thread::Builder::new()
            .name(format!("spectro-worker-{slot}"))
            .spawn(move || worker_loop(slot, generation, rx, control_tx, transform))?;

        Ok(WorkerSlot {
            tx,
            generation,
            in_flight: None,
        })
    }
}

fn worker_loop(
    slot: usize,
    generation: u64,
    rx: Receiver<WorkerRequest>,
    control_tx: Sender<Control>,
    transform: Arc<dyn Transform>,
) {
    let send = |response: WorkerResponse| {
        control_tx
            .send(Control::Worker {
                slot,
                generation,
                response,
            })
            .is_ok()
    };

    if !send(WorkerResponse::Ready { id: slot }) {
        return;
    }

    while let Ok(WorkerRequest::ProcessChunk { id, data }) = rx.recv() {
        send(WorkerResponse::Log {
            data: LogRecord {
                source: format!("worker-{slot}"),
                message: format!("{id}: {} samples", data.sample_slice.len()),
            },
        });

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            transform.render(&data.sample_slice, data.sample_rate, &data.params)
        }));

        let response = match outcome {
            Ok(Ok(image)) => WorkerResponse::ChunkComplete { id, data: image },
            Ok(Err(e)) => WorkerResponse::Error {
                id,
                error: e.to_string(),
            },
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                let _ = control_tx.send(Control::Faulted {
                    slot,
                    generation,
                    message,
                });
                return;
            }
        };

        if !send(response) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::params::SpectrogramParams;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Renders one column per sample, height 2; sleeps `samples[0]` ms and
    /// panics when the first sample is negative.
    struct Tracker {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Tracker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    impl Transform for Tracker {
        fn render(
            &self,
            samples: &[f32],
            _sample_rate: u32,
            _params: &SpectrogramParams,
        ) -> Result<ChunkResult, TaskError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let first = samples.first().copied().unwrap_or(0.0);
            std::thread::sleep(Duration::from_millis(first.abs() as u64));
            self.running.fetch_sub(1, Ordering::SeqCst);
            if first < 0.0 {
                panic!("tracker fault");
            }
            Ok(ChunkResult {
                width: samples.len() as u32,
                height: 2,
                pixels: vec![0; samples.len() * 2 * 4],
            })
        }
    }

    fn task(first: f32, len: usize) -> SpectrogramTask {
        let mut samples = vec![0.0; len];
        samples[0] = first;
        SpectrogramTask::new(samples, 16_000, SpectrogramParams::default())
    }

    #[tokio::test]
    async fn becomes_ready_and_completes_tasks() {
        let pool = WorkerPool::new(2, Tracker::new()).unwrap();
        assert!(pool.wait_for_ready(Duration::from_secs(5)).await);

        let image = pool.submit(task(0.0, 5)).result().await.unwrap();
        assert_eq!((image.width, image.height), (5, 2));
    }

    #[tokio::test]
    async fn never_runs_more_than_pool_size_at_once() {
        let tracker = Tracker::new();
        let pool = WorkerPool::new(2, tracker.clone()).unwrap();

        let handles: Vec<_> = (0..6).map(|i| pool.submit(task(20.0, i + 1))).collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.result().await.unwrap().width, i as u32 + 1);
        }
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn faulted_worker_rejects_its_task_and_is_replaced() {
        let pool = WorkerPool::new(1, Tracker::new()).unwrap();
        assert!(pool.wait_for_ready(Duration::from_secs(5)).await);

        let err = pool.submit(task(-1.0, 3)).result().await.unwrap_err();
        assert_eq!(err, TaskError::WorkerFault { worker: 0 });

        let image = pool.submit(task(0.0, 3)).result().await.unwrap();
        assert_eq!(image.width, 3);
    }

    #[tokio::test]
    async fn invalid_params_are_rejected_without_dispatch() {
        let pool = WorkerPool::new(1, Tracker::new()).unwrap();
        let mut bad = task(0.0, 3);
        bad.params.hop_length = 0;
        let err = pool.submit(bad).result().await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidParams(_)));
    }

    #[test]
    fn pool_size_respects_cap() {
        assert_eq!(default_pool_size(1), 1);
        assert!(default_pool_size(64) >= 1);
    }

    #[test]
    fn cache_reuses_live_pool() {
        let cache = PoolCache::default();
        let a = cache.get_or_spawn(1, Tracker::new()).unwrap();
        let b = cache.get_or_spawn(1, Tracker::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        drop((a, b));
        let c = cache.get_or_spawn(1, Tracker::new()).unwrap();
        assert_eq!(c.size(), 1);
    }
}
