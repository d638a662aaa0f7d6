//! Per-table sample batching worker
//!
//! Sampler streams enqueue requests here instead of calling the table
//! directly. A single worker thread drains the queue, so batch requests
//! are answered strictly one at a time; this is what keeps FIFO samplers
//! honest when several streams are open, and it amortizes mutex and
//! limiter overhead through flexible batches.

use crate::item::SampledItem;
use crate::table::Table;
use crate::{Error, Result};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One batch request against a table
#[derive(Debug, Clone)]
pub struct SampleRequest {
    /// Total items the caller wants
    pub num_samples: usize,
    /// Upper bound per critical section; 0 auto-selects by sampler kind
    pub flexible_batch_size: usize,
    /// Overall deadline; `None` waits until the table closes
    pub timeout: Option<Duration>,
}

struct QueuedRequest {
    request: SampleRequest,
    reply: mpsc::SyncSender<Result<Vec<SampledItem>>>,
}

/// Serializes sample batch requests against one table
pub struct SampleWorker {
    queue: Option<mpsc::SyncSender<QueuedRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl SampleWorker {
    /// Spawn a worker draining up to `queue_depth` pending requests
    pub fn spawn(table: Arc<Table>, queue_depth: usize) -> Result<Self> {
        let (queue, incoming) = mpsc::sync_channel::<QueuedRequest>(queue_depth);
        let name = format!("sample-worker-{}", table.name());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(table, incoming))
            .map_err(|err| Error::Internal(format!("failed to spawn sample worker: {err}")))?;
        Ok(Self {
            queue: Some(queue),
            handle: Some(handle),
        })
    }

    fn run(table: Arc<Table>, incoming: mpsc::Receiver<QueuedRequest>) {
        debug!(table = table.name(), "Sample worker started");
        while let Ok(queued) = incoming.recv() {
            let result = Self::fulfill(&table, &queued.request);
            if queued.reply.send(result).is_err() {
                warn!(table = table.name(), "Dropping batch for a gone requester");
            }
        }
        debug!(table = table.name(), "Sample worker stopped");
    }

    /// Accumulate flexible batches until the request is filled
    ///
    /// A limiter timeout after some items were already gathered truncates
    /// the batch instead of failing it; callers treat a short batch as the
    /// stream running dry.
    fn fulfill(table: &Table, request: &SampleRequest) -> Result<Vec<SampledItem>> {
        let deadline = request.timeout.map(|t| Instant::now() + t);
        let mut gathered: Vec<SampledItem> = Vec::with_capacity(request.num_samples);

        while gathered.len() < request.num_samples {
            let remaining_timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let batch = table.sample(
                request.num_samples - gathered.len(),
                request.flexible_batch_size,
                remaining_timeout,
            );
            match batch {
                Ok(batch) => gathered.extend(batch),
                Err(err) if err.is_rate_limiter_timeout() && !gathered.is_empty() => {
                    debug!(
                        table = table.name(),
                        gathered = gathered.len(),
                        requested = request.num_samples,
                        "Returning truncated batch after limiter timeout"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(gathered)
    }

    fn queue(&self) -> Result<&mpsc::SyncSender<QueuedRequest>> {
        self.queue
            .as_ref()
            .ok_or_else(|| Error::Cancelled("sample worker has shut down".to_string()))
    }

    /// Enqueue a request and block until the worker answers
    pub fn sample(&self, request: SampleRequest) -> Result<Vec<SampledItem>> {
        let (reply, response) = mpsc::sync_channel(1);
        self.queue()?
            .send(QueuedRequest { request, reply })
            .map_err(|_| Error::Cancelled("sample worker has shut down".to_string()))?;
        response
            .recv()
            .map_err(|_| Error::Cancelled("sample worker dropped the request".to_string()))?
    }

    /// Enqueue without blocking on a full queue
    ///
    /// Returns `ResourceExhausted` when `queue_depth` requests are already
    /// pending, giving callers a backpressure signal instead of a stall.
    pub fn try_sample(&self, request: SampleRequest) -> Result<Vec<SampledItem>> {
        let (reply, response) = mpsc::sync_channel(1);
        self.queue()?
            .try_send(QueuedRequest { request, reply })
            .map_err(|err| match err {
                mpsc::TrySendError::Full(_) => {
                    Error::ResourceExhausted("sample worker queue is full".to_string())
                }
                mpsc::TrySendError::Disconnected(_) => {
                    Error::Cancelled("sample worker has shut down".to_string())
                }
            })?;
        response
            .recv()
            .map_err(|_| Error::Cancelled("sample worker dropped the request".to_string()))?
    }

    /// Stop accepting requests and join the worker thread
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        self.queue.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SampleWorker {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkStore, SequenceRange};
    use crate::item::Item;
    use crate::rate_limiter::RateLimiter;
    use crate::selectors::{FifoSelector, ItemSelector, UniformSelector};
    use crate::trajectory::{ChunkSlice, Column, DType, Trajectory};

    fn seeded_store() -> Arc<ChunkStore> {
        let store = Arc::new(ChunkStore::new());
        std::mem::forget(store.insert_or_get(Chunk {
            key: 1,
            data: vec![0u8; 8],
            sequence_range: SequenceRange {
                episode_id: 1,
                start: 0,
                end: 1,
                delta_encoded: false,
            },
            dtype: DType::F32,
            shape: vec![],
        }));
        store
    }

    fn trajectory() -> Trajectory {
        Trajectory::new(vec![Column {
            slices: vec![ChunkSlice {
                chunk_key: 1,
                offset: 0,
                length: 2,
            }],
            squeeze: false,
            dtype: DType::F32,
            shape: vec![],
        }])
    }

    fn build_table(
        sampler: Box<dyn ItemSelector>,
        max_times_sampled: u32,
        limiter: RateLimiter,
    ) -> Arc<Table> {
        Arc::new(
            Table::new(
                "worker-test",
                100,
                max_times_sampled,
                sampler,
                Box::new(FifoSelector::new()),
                limiter,
                None,
                seeded_store(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_worker_fills_request_across_batches() {
        let table = build_table(
            Box::new(UniformSelector::new()),
            0,
            RateLimiter::min_size(1).unwrap(),
        );
        for key in 0..10 {
            table
                .insert_or_assign(Item::new(key, "worker-test", 1.0, trajectory()))
                .unwrap();
        }
        let worker = SampleWorker::spawn(Arc::clone(&table), 4).unwrap();
        let batch = worker
            .sample(SampleRequest {
                num_samples: 7,
                flexible_batch_size: 2,
                timeout: Some(Duration::from_secs(5)),
            })
            .unwrap();
        assert_eq!(batch.len(), 7);
        worker.shutdown();
    }

    #[test]
    fn test_worker_truncates_on_limiter_timeout() {
        // At most one sample per insert: the second pick must time out.
        let table = build_table(
            Box::new(FifoSelector::new()),
            0,
            RateLimiter::new(1.0, 1, 1.0, f64::MAX).unwrap(),
        );
        table
            .insert_or_assign(Item::new(1, "worker-test", 1.0, trajectory()))
            .unwrap();

        let worker = SampleWorker::spawn(Arc::clone(&table), 4).unwrap();
        let batch = worker
            .sample(SampleRequest {
                num_samples: 3,
                flexible_batch_size: 1,
                timeout: Some(Duration::from_millis(100)),
            })
            .unwrap();
        assert_eq!(batch.len(), 1);
        worker.shutdown();
    }

    #[test]
    fn test_worker_propagates_timeout_when_empty() {
        let table = build_table(
            Box::new(FifoSelector::new()),
            0,
            RateLimiter::min_size(1).unwrap(),
        );
        let worker = SampleWorker::spawn(Arc::clone(&table), 4).unwrap();
        let err = worker
            .sample(SampleRequest {
                num_samples: 1,
                flexible_batch_size: 1,
                timeout: Some(Duration::from_millis(50)),
            })
            .unwrap_err();
        assert!(err.is_rate_limiter_timeout());
        worker.shutdown();
    }

    #[test]
    fn test_worker_drains_queue_table_in_order() {
        // max_times_sampled=1 turns the table into a FIFO queue.
        let table = build_table(
            Box::new(FifoSelector::new()),
            1,
            RateLimiter::min_size(1).unwrap(),
        );
        for key in 0..6 {
            table
                .insert_or_assign(Item::new(key, "worker-test", 1.0, trajectory()))
                .unwrap();
        }

        let worker = SampleWorker::spawn(Arc::clone(&table), 8).unwrap();
        let mut keys = Vec::new();
        for _ in 0..6 {
            let batch = worker
                .sample(SampleRequest {
                    num_samples: 1,
                    flexible_batch_size: 1,
                    timeout: Some(Duration::from_secs(5)),
                })
                .unwrap();
            keys.push(batch[0].key);
        }
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(table.num_items(), 0);
    }

    #[test]
    fn test_worker_reports_cancellation_on_closed_table() {
        let table = build_table(
            Box::new(FifoSelector::new()),
            0,
            RateLimiter::min_size(1).unwrap(),
        );
        table.close();
        let worker = SampleWorker::spawn(Arc::clone(&table), 1).unwrap();
        let err = worker
            .sample(SampleRequest {
                num_samples: 1,
                flexible_batch_size: 1,
                timeout: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        worker.shutdown();
    }
}
