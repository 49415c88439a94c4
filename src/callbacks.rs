// src/callbacks.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::{QueueScaleError, QueueScaleResult};
use crate::types::{QueueSnapshot, ScaleRequest, ScaleTrigger, SkipReason, WorkerCount, WorkerRecord};

/// Read-only view of the job queue
///
/// Implement this over your queue backend (Redis, Postgres, ...). The engine
/// never caches what it reads here; every decision asks again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Jobs enqueued but not yet claimed by a worker
    async fn pending_jobs(&self) -> QueueScaleResult<u64>;

    /// Jobs currently being worked
    async fn working_jobs(&self) -> QueueScaleResult<u64>;

    /// Capture both counts
    ///
    /// Override this if your backend can read both values in one round trip.
    async fn snapshot(&self) -> QueueScaleResult<QueueSnapshot> {
        let pending_jobs = self.pending_jobs().await?;
        let working_jobs = self.working_jobs().await?;
        Ok(QueueSnapshot {
            pending_jobs,
            working_jobs,
        })
    }
}

/// Registry of worker processes known to the queue
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Worker entries that should be cleared before scaling up from zero
    ///
    /// When the provider reports no running workers, every registered entry
    /// belongs to a process that is gone.
    async fn list_stale_workers(&self) -> QueueScaleResult<Vec<WorkerRecord>>;

    /// Mark the worker as done and remove it from the registry
    async fn deregister(&self, worker: &WorkerRecord) -> QueueScaleResult<()>;
}

/// Interface to the process-scaling provider
///
/// Transport, authentication and timeouts belong to the implementation.
/// Failures should be reported as [`QueueScaleError::ProviderUnavailable`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scaler: Send + Sync {
    /// Number of running processes of `process_type`
    async fn current_worker_count(
        &self,
        app_id: &str,
        process_type: &str,
    ) -> QueueScaleResult<WorkerCount>;

    /// Ask the provider to run exactly `count` processes of `process_type`
    async fn set_worker_count(
        &self,
        app_id: &str,
        process_type: &str,
        count: WorkerCount,
    ) -> QueueScaleResult<()>;
}

/// Shared store for the time of the last scaling action
///
/// Every process running an engine against the same pool must point at the
/// same store. Only one timestamp is kept.
#[async_trait]
pub trait DebounceStore: Send + Sync {
    /// Last stamp, or `None` if scaling never happened
    async fn get(&self) -> QueueScaleResult<Option<DateTime<Utc>>>;

    /// Overwrite the stamp
    async fn set(&self, timestamp: DateTime<Utc>) -> QueueScaleResult<()>;

    /// Remove the stamp so the next decision runs immediately
    async fn clear(&self) -> QueueScaleResult<()>;

    /// Write `new` only if the stored value equals `expected`
    ///
    /// The default implementation reads then writes and is not atomic.
    /// Stores with a native compare-and-swap should override it.
    async fn compare_and_set(
        &self,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> QueueScaleResult<bool> {
        if self.get().await? != expected {
            return Ok(false);
        }
        self.set(new).await?;
        Ok(true)
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Trait for receiving scaling events and decisions
///
/// This is the engine's only reporting channel besides `tracing` debug
/// output. Observer errors are logged and never affect the decision.
#[async_trait]
pub trait ScalingObserver: Send + Sync {
    /// Called after the provider accepted a new worker count
    async fn on_scale_requested(&self, _request: &ScaleRequest) -> QueueScaleResult<()> {
        Ok(())
    }

    /// Called when a decision ends without a provider call
    async fn on_scale_skipped(
        &self,
        _trigger: ScaleTrigger,
        _reason: &SkipReason,
    ) -> QueueScaleResult<()> {
        Ok(())
    }

    /// Called when the provider call failed
    async fn on_scale_error(
        &self,
        _request: &ScaleRequest,
        _error: &QueueScaleError,
    ) -> QueueScaleResult<()> {
        Ok(())
    }

    /// Called after stale registry entries were removed
    async fn on_stale_workers_cleared(&self, _workers: &[WorkerRecord]) -> QueueScaleResult<()> {
        Ok(())
    }
}

/// Observer that reports events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

#[async_trait]
impl ScalingObserver for TracingObserver {
    async fn on_scale_requested(&self, request: &ScaleRequest) -> QueueScaleResult<()> {
        info!(
            app_id = %request.app_id,
            process_type = %request.process_type,
            from = request.from,
            to = request.to,
            trigger = %request.trigger,
            "Scaled workers"
        );
        Ok(())
    }

    async fn on_scale_error(
        &self,
        request: &ScaleRequest,
        error: &QueueScaleError,
    ) -> QueueScaleResult<()> {
        error!(
            app_id = %request.app_id,
            process_type = %request.process_type,
            to = request.to,
            trigger = %request.trigger,
            "Failed to scale workers: {}",
            error
        );
        Ok(())
    }

    async fn on_stale_workers_cleared(&self, workers: &[WorkerRecord]) -> QueueScaleResult<()> {
        if !workers.is_empty() {
            warn!(count = workers.len(), "Cleared stale worker registrations");
        }
        Ok(())
    }
}

/// Combine all collaborators into a single struct for easier management
#[derive(Clone)]
pub struct EngineCallbacks {
    pub queue: Arc<dyn JobQueue>,
    pub registry: Arc<dyn WorkerRegistry>,
    pub scaler: Arc<dyn Scaler>,
    pub debounce_store: Arc<dyn DebounceStore>,
    pub clock: Arc<dyn Clock>,
    pub observers: Vec<Arc<dyn ScalingObserver>>,
}

impl EngineCallbacks {
    /// Create a new collaborator set using the system clock
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: Arc<dyn WorkerRegistry>,
        scaler: Arc<dyn Scaler>,
        debounce_store: Arc<dyn DebounceStore>,
    ) -> Self {
        Self {
            queue,
            registry,
            scaler,
            debounce_store,
            clock: Arc::new(SystemClock),
            observers: Vec::new(),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add an observer to receive scaling events
    pub fn add_observer(mut self, observer: Arc<dyn ScalingObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Add multiple observers at once
    pub fn add_observers(mut self, observers: Vec<Arc<dyn ScalingObserver>>) -> Self {
        self.observers.extend(observers);
        self
    }
}
