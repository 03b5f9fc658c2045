//! Batch coordinator
//!
//! Many independent origins share one mode, budget, break set and overlay.
//! A dispatcher thread pulls batches from a bounded queue and fans each one
//! out over a dedicated rayon pool:
//!
//! - results come back in input order, one slot per origin
//! - one origin failing never affects its siblings
//! - a full queue blocks `run_batch` and rejects `try_run_batch`
//! - the batch timeout cancels unfinished origins cooperatively

use crossbeam_channel::{bounded, Sender, TrySendError};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::config::WorkerConfig;
use crate::error::{BatchError, QueryError};
use crate::isochrone::{Breaks, IsochroneEngine, IsochroneRequest, IsochroneResult};
use crate::mode::Mode;
use crate::network::NodeId;
use crate::overlay::ScenarioOverlay;

pub mod export;

/// Origins sharing one query shape
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub origins: Vec<NodeId>,
    pub mode: Mode,
    pub max_cost: f64,
    pub breaks: Option<Breaks>,
    pub overlay: Option<Arc<ScenarioOverlay>>,
    pub with_paths: bool,
    /// Overrides the coordinator's batch timeout
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl BatchRequest {
    pub fn new(origins: Vec<NodeId>, mode: Mode, max_cost: f64) -> Self {
        Self {
            origins,
            mode,
            max_cost,
            breaks: None,
            overlay: None,
            with_paths: false,
            timeout: None,
            cancel: None,
        }
    }

    pub fn with_breaks(mut self, breaks: Breaks) -> Self {
        self.breaks = Some(breaks);
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<ScenarioOverlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn request_for(&self, origin: NodeId, cancel: &CancelToken) -> IsochroneRequest {
        IsochroneRequest {
            origin,
            mode: self.mode,
            max_cost: self.max_cost,
            breaks: self.breaks.clone(),
            overlay: self.overlay.clone(),
            with_paths: self.with_paths,
            cancel: Some(cancel.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub origins: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Successful slots whose search was cancelled or timed out
    pub incomplete: usize,
    pub reached_total: usize,
    pub threads: usize,
    pub queue_wait_ms: u64,
    pub elapsed_ms: u64,
}

/// One outcome per origin, in input order
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<Result<IsochroneResult, QueryError>>,
    pub breaks: Option<Breaks>,
    pub stats: BatchStats,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

struct Job {
    engine: Arc<IsochroneEngine>,
    request: BatchRequest,
    submitted: Instant,
    reply: Sender<BatchResult>,
}

/// Bounded-queue front end to a fixed worker pool
pub struct BatchCoordinator {
    sender: Option<Sender<Job>>,
    dispatcher: Option<JoinHandle<()>>,
    capacity: usize,
    threads: usize,
}

impl BatchCoordinator {
    pub fn new(config: &WorkerConfig) -> Result<Self, BatchError> {
        let threads = config.resolved_threads();
        let capacity = config.queue_capacity.max(1);
        let default_timeout = config.batch_timeout();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("reach-worker-{i}"))
            .build()
            .map_err(|e| BatchError::Pool(e.to_string()))?;

        let (sender, receiver) = bounded::<Job>(capacity);
        let dispatcher = thread::Builder::new()
            .name("reach-dispatcher".into())
            .spawn(move || {
                for job in receiver.iter() {
                    let result = pool.install(|| execute(&job, threads, default_timeout));
                    // the submitter may have gone away
                    let _ = job.reply.send(result);
                }
                tracing::debug!("batch dispatcher stopped");
            })
            .map_err(|e| BatchError::Pool(e.to_string()))?;

        tracing::info!(threads, queue_capacity = capacity, "batch coordinator started");
        Ok(Self {
            sender: Some(sender),
            dispatcher: Some(dispatcher),
            capacity,
            threads,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a batch, waiting for a free slot, and wait for its result
    pub fn run_batch(
        &self,
        engine: Arc<IsochroneEngine>,
        request: BatchRequest,
    ) -> Result<BatchResult, BatchError> {
        let sender = self.sender.as_ref().ok_or(BatchError::ShutDown)?;
        let (reply, response) = bounded(1);
        sender
            .send(Job {
                engine,
                request,
                submitted: Instant::now(),
                reply,
            })
            .map_err(|_| BatchError::ShutDown)?;
        response.recv().map_err(|_| BatchError::ShutDown)
    }

    /// Like [`run_batch`](Self::run_batch) but fails instead of waiting for a queue slot
    pub fn try_run_batch(
        &self,
        engine: Arc<IsochroneEngine>,
        request: BatchRequest,
    ) -> Result<BatchResult, BatchError> {
        let sender = self.sender.as_ref().ok_or(BatchError::ShutDown)?;
        let (reply, response) = bounded(1);
        let job = Job {
            engine,
            request,
            submitted: Instant::now(),
            reply,
        };
        match sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(BatchError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => return Err(BatchError::ShutDown),
        }
        response.recv().map_err(|_| BatchError::ShutDown)
    }

    /// Stop accepting batches and wait for queued ones to finish
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                tracing::error!("batch dispatcher panicked");
            }
        }
    }
}

impl Drop for BatchCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run every origin of one batch on the current pool
fn execute(job: &Job, threads: usize, default_timeout: Option<Duration>) -> BatchResult {
    let started = Instant::now();
    let request = &job.request;
    let timeout = request.timeout.or(default_timeout);
    let cancel = match &request.cancel {
        Some(token) => token.child_with_timeout(timeout),
        None => CancelToken::new().child_with_timeout(timeout),
    };

    let results: Vec<Result<IsochroneResult, QueryError>> = request
        .origins
        .par_iter()
        .map(|&origin| job.engine.isochrone(&request.request_for(origin, &cancel)))
        .collect();

    let mut stats = BatchStats {
        origins: results.len(),
        threads,
        queue_wait_ms: started.duration_since(job.submitted).as_millis() as u64,
        elapsed_ms: started.elapsed().as_millis() as u64,
        ..Default::default()
    };
    for outcome in &results {
        match outcome {
            Ok(result) => {
                stats.succeeded += 1;
                stats.reached_total += result.len();
                if !result.is_complete() {
                    stats.incomplete += 1;
                }
            }
            Err(_) => stats.failed += 1,
        }
    }

    tracing::info!(
        origins = stats.origins,
        failed = stats.failed,
        incomplete = stats.incomplete,
        reached = stats.reached_total,
        elapsed_ms = stats.elapsed_ms,
        "batch finished"
    );

    BatchResult {
        results,
        breaks: request.breaks.clone(),
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ch;
    use crate::config::{ContractionConfig, QueryConfig};
    use crate::network::NetworkStore;
    use crate::synthetic;

    fn grid_engine() -> Arc<IsochroneEngine> {
        let store = NetworkStore::new();
        let handle = store.publish(synthetic::grid(6, 6, 1.0).unwrap());
        let hierarchy = ch::build(&handle, Mode::Walk, &ContractionConfig::default()).unwrap();
        Arc::new(IsochroneEngine::new(handle, Arc::new(hierarchy), QueryConfig::default()).unwrap())
    }

    fn workers(threads: usize, queue_capacity: usize) -> WorkerConfig {
        WorkerConfig {
            threads,
            queue_capacity,
            batch_timeout_ms: None,
        }
    }

    #[test]
    fn test_results_keep_input_order() {
        let engine = grid_engine();
        let coordinator = BatchCoordinator::new(&workers(4, 2)).unwrap();
        let origins: Vec<NodeId> = (0..36).rev().map(NodeId).chain([NodeId(99)]).collect();

        let result = coordinator
            .run_batch(engine, BatchRequest::new(origins.clone(), Mode::Walk, 2.0))
            .unwrap();

        assert_eq!(result.len(), origins.len());
        for (slot, origin) in result.results.iter().zip(&origins) {
            match slot {
                Ok(r) => assert_eq!(r.origin, *origin),
                Err(e) => {
                    assert_eq!(*origin, NodeId(99));
                    assert!(matches!(e, QueryError::NodeNotFound { .. }));
                }
            }
        }
        assert_eq!(result.stats.succeeded, 36);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.threads, 4);
    }

    #[test]
    fn test_full_queue_is_reported() {
        let engine = grid_engine();
        // A queue nobody drains: the first job fills it.
        let (sender, _receiver) = bounded(1);
        let (reply, _response) = bounded(1);
        sender
            .send(Job {
                engine: Arc::clone(&engine),
                request: BatchRequest::new(vec![NodeId(0)], Mode::Walk, 1.0),
                submitted: Instant::now(),
                reply,
            })
            .unwrap();
        let coordinator = BatchCoordinator {
            sender: Some(sender),
            dispatcher: None,
            capacity: 1,
            threads: 1,
        };

        let err = coordinator
            .try_run_batch(engine, BatchRequest::new(vec![NodeId(1)], Mode::Walk, 1.0))
            .unwrap_err();
        assert_eq!(err, BatchError::QueueFull { capacity: 1 });
    }

    #[test]
    fn test_shut_down_coordinator_rejects_batches() {
        let engine = grid_engine();
        let mut coordinator = BatchCoordinator::new(&workers(1, 1)).unwrap();
        coordinator.shutdown();
        let err = coordinator
            .run_batch(engine, BatchRequest::new(vec![NodeId(0)], Mode::Walk, 1.0))
            .unwrap_err();
        assert_eq!(err, BatchError::ShutDown);
    }

    #[test]
    fn test_cancelled_batch_marks_every_slot() {
        let engine = grid_engine();
        let coordinator = BatchCoordinator::new(&workers(2, 1)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let mut request = BatchRequest::new((0..10).map(NodeId).collect(), Mode::Walk, 5.0);
        request.cancel = Some(token);

        let result = coordinator.run_batch(engine, request).unwrap();
        assert_eq!(result.stats.incomplete, 10);
        for (i, slot) in result.results.iter().enumerate() {
            let r = slot.as_ref().unwrap();
            assert_eq!(r.status, crate::isochrone::Completion::Cancelled);
            assert!(r.contains(NodeId(i as u32)));
        }
    }
}
