//! # queuescale - Worker-Pool Autoscaling Decisions
//!
//! queuescale decides how many worker processes a job-queue-backed pool should
//! run. It is driven by job lifecycle events rather than a polling loop: every
//! enqueue, completion and failure asks the engine whether the pool should
//! change size, and the engine answers using a policy that maps pending jobs to
//! a worker count.
//!
//! ## Decision rules
//!
//! ```text
//!  job enqueued ──► scale_on_enqueue ─┐
//!  job completed ─┐                   │
//!  job failed ────┴► reconcile ───────┤
//!                                     ▼
//!                          ┌─────────────────────┐
//!                          │   debounce gate     │  last_scaled + wait_time
//!                          └──────────┬──────────┘
//!                                     ▼
//!                          ┌─────────────────────┐
//!                          │  target from Policy │
//!                          └──────────┬──────────┘
//!                                     ▼
//!                          ┌─────────────────────┐
//!                          │ request_worker_count│  no-op / in-flight guards
//!                          └──────────┬──────────┘
//!                                     ▼
//!                              Scaler (provider)
//! ```
//!
//! - Enqueue events only scale up (and clear stale worker registrations when
//!   the provider reports zero workers).
//! - Completion and failure events scale up, or straight down to the policy
//!   floor, never to an intermediate count.
//! - The pool is never shrunk while more than one job is being worked.
//! - One shared `last_scaled` timestamp debounces every engine instance
//!   pointed at the same [`DebounceStore`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use queuescale::{
//!     DecisionEngine, EngineCallbacks, InMemoryDebounceStore, JobQueue, Policy,
//!     QueueScaleResult, Scaler, TracingObserver, WorkerCount, WorkerRecord, WorkerRegistry,
//! };
//! use std::sync::Arc;
//!
//! struct MyQueue;
//! #[async_trait::async_trait]
//! impl JobQueue for MyQueue {
//!     async fn pending_jobs(&self) -> QueueScaleResult<u64> { Ok(12) }
//!     async fn working_jobs(&self) -> QueueScaleResult<u64> { Ok(0) }
//! }
//!
//! struct MyRegistry;
//! #[async_trait::async_trait]
//! impl WorkerRegistry for MyRegistry {
//!     async fn list_stale_workers(&self) -> QueueScaleResult<Vec<WorkerRecord>> { Ok(vec![]) }
//!     async fn deregister(&self, _worker: &WorkerRecord) -> QueueScaleResult<()> { Ok(()) }
//! }
//!
//! struct MyProvider;
//! #[async_trait::async_trait]
//! impl Scaler for MyProvider {
//!     async fn current_worker_count(&self, _app: &str, _ptype: &str) -> QueueScaleResult<WorkerCount> {
//!         Ok(0)
//!     }
//!     async fn set_worker_count(&self, _app: &str, _ptype: &str, _n: WorkerCount) -> QueueScaleResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> QueueScaleResult<()> {
//!     let policy = Policy::builder("billing-app")
//!         .process_type("worker")
//!         .wait_time_seconds(60)
//!         .desired_workers(|pending| pending.div_ceil(5) as i64)
//!         .build()?;
//!
//!     let callbacks = EngineCallbacks::new(
//!         Arc::new(MyQueue),
//!         Arc::new(MyRegistry),
//!         Arc::new(MyProvider),
//!         Arc::new(InMemoryDebounceStore::new()),
//!     )
//!     .add_observer(Arc::new(TracingObserver));
//!
//!     let engine = DecisionEngine::new(policy, callbacks);
//!
//!     // Call directly from a job hook...
//!     let outcome = engine.on_enqueue().await?;
//!     println!("{:?}", outcome);
//!
//!     // ...or run it in the background and fire-and-forget.
//!     let handle = engine.handle();
//!     tokio::spawn(engine.start());
//!     handle.job_completed()?;
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `config-toml`: load [`PolicyConfig`] from TOML
//! - `prometheus-metrics`: [`PrometheusObserver`] counters

pub mod error;
pub mod utils;
pub mod types;
pub mod engine;
pub mod policies;
pub mod callbacks;
pub mod debounce;
#[cfg(feature = "prometheus-metrics")]
pub mod metrics;

// Re-export common types for convenience
pub use types::{
    PolicyConfig, QueueSnapshot, ScaleOutcome, ScaleRequest, ScaleTrigger, SkipReason,
    WorkerCount, WorkerCurve, WorkerRecord, WorkerTier,
};

pub use error::{QueueScaleError, QueueScaleResult};

pub use policies::{DesiredWorkersFn, Policy, PolicyBuilder};

pub use callbacks::{
    Clock, DebounceStore, EngineCallbacks, JobQueue, Scaler, ScalingObserver, SystemClock,
    TracingObserver, WorkerRegistry,
};

pub use debounce::{FileDebounceStore, InMemoryDebounceStore};

pub use engine::{DebounceMode, DecisionEngine, EngineHandle, EngineStatus};

#[cfg(feature = "prometheus-metrics")]
pub use metrics::PrometheusObserver;
