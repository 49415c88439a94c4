// demos/enqueue_burst.rs
//! Burst of enqueues followed by a drain, against simulated collaborators
//!
//! This example demonstrates:
//! - Building a policy from JSON configuration
//! - Implementing the queue, registry and provider traits
//! - Driving the engine from job hooks through an `EngineHandle`
//! - Debounce and in-flight protection in action
//!
//! Run with: RUST_LOG=debug cargo run --example enqueue_burst

use async_trait::async_trait;
use queuescale::{
    DecisionEngine, EngineCallbacks, InMemoryDebounceStore, JobQueue, Policy, PolicyConfig,
    QueueScaleResult, Scaler, TracingObserver, WorkerCount, WorkerRecord, WorkerRegistry,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// In-memory queue counters
#[derive(Default)]
struct SimulatedQueue {
    pending: AtomicU64,
    working: AtomicU64,
}

#[async_trait]
impl JobQueue for SimulatedQueue {
    async fn pending_jobs(&self) -> QueueScaleResult<u64> {
        Ok(self.pending.load(Ordering::SeqCst))
    }

    async fn working_jobs(&self) -> QueueScaleResult<u64> {
        Ok(self.working.load(Ordering::SeqCst))
    }
}

/// Registry left over from a crashed deploy
struct LeftoverRegistry {
    workers: tokio::sync::Mutex<Vec<WorkerRecord>>,
}

#[async_trait]
impl WorkerRegistry for LeftoverRegistry {
    async fn list_stale_workers(&self) -> QueueScaleResult<Vec<WorkerRecord>> {
        Ok(self.workers.lock().await.clone())
    }

    async fn deregister(&self, worker: &WorkerRecord) -> QueueScaleResult<()> {
        println!("🧹 Deregistering stale worker {}", worker.id);
        self.workers.lock().await.retain(|w| w.id != worker.id);
        Ok(())
    }
}

/// Provider that just remembers the requested count
#[derive(Default)]
struct SimulatedProvider {
    running: AtomicU32,
}

#[async_trait]
impl Scaler for SimulatedProvider {
    async fn current_worker_count(
        &self,
        _app_id: &str,
        _process_type: &str,
    ) -> QueueScaleResult<WorkerCount> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn set_worker_count(
        &self,
        app_id: &str,
        process_type: &str,
        count: WorkerCount,
    ) -> QueueScaleResult<()> {
        // Simulate the API round trip
        sleep(Duration::from_millis(50)).await;
        println!("🔧 {}: {} -> {}", app_id, process_type, count);
        self.running.store(count, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = PolicyConfig::from_json_str(
        r#"{
            "app_id": "billing",
            "wait_time_seconds": 1,
            "worker_curve": { "kind": "jobs_per_worker", "jobs_per_worker": 5, "max_workers": 8 }
        }"#,
    )?;
    let policy = Policy::from_config(config)?;

    let queue = Arc::new(SimulatedQueue::default());
    let provider = Arc::new(SimulatedProvider::default());
    let registry = Arc::new(LeftoverRegistry {
        workers: tokio::sync::Mutex::new(vec![WorkerRecord::new("old-host:4242:*")]),
    });

    let callbacks = EngineCallbacks::new(
        queue.clone(),
        registry,
        provider.clone(),
        Arc::new(InMemoryDebounceStore::new()),
    )
    .add_observer(Arc::new(TracingObserver));

    let engine = DecisionEngine::new(policy, callbacks);
    let handle = engine.handle();
    let engine_task = tokio::spawn(engine.start());

    println!("📈 Enqueueing a burst of 23 jobs");
    for _ in 0..23 {
        queue.pending.fetch_add(1, Ordering::SeqCst);
        handle.job_enqueued()?;
    }
    sleep(Duration::from_millis(1200)).await;

    println!("📈 Another enqueue after the debounce window");
    queue.pending.fetch_add(1, Ordering::SeqCst);
    handle.job_enqueued()?;
    sleep(Duration::from_millis(1200)).await;

    println!("📉 Draining with three jobs still running");
    queue.pending.store(0, Ordering::SeqCst);
    queue.working.store(3, Ordering::SeqCst);
    handle.job_completed()?;
    sleep(Duration::from_millis(1200)).await;

    println!("📉 Last job finished");
    queue.working.store(0, Ordering::SeqCst);
    handle.job_completed()?;
    sleep(Duration::from_millis(200)).await;

    let status = handle.status().await?;
    println!("\n📊 Engine Status:");
    println!("   - Triggers handled: {}", status.triggers_handled);
    println!("   - Scale requests: {}", status.scale_requests);
    println!("   - Skipped decisions: {}", status.skipped_decisions);
    println!("   - Running workers: {}", provider.running.load(Ordering::SeqCst));

    handle.shutdown().await?;
    engine_task.await??;
    Ok(())
}
