// src/engine.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::callbacks::EngineCallbacks;
use crate::error::{QueueScaleError, QueueScaleResult};
use crate::policies::{clamp_count, Policy};
use crate::types::{
    QueueSnapshot, ScaleOutcome, ScaleRequest, ScaleTrigger, SkipReason, WorkerCount,
    WorkerRecord,
};

/// How handlers coordinate on the shared debounce stamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceMode {
    /// Read the stamp at the gate and write it after deciding.
    ///
    /// Two handlers can pass the gate inside one window and both scale.
    #[default]
    ReadThenWrite,
    /// Claim the window at the gate with `compare_and_set`; losers skip.
    CompareAndSwap,
}

/// Commands that can be sent to the decision engine
#[derive(Debug)]
pub enum EngineCommand {
    /// Run the handler for a job lifecycle event
    Trigger(ScaleTrigger),
    /// Get current engine status
    GetStatus {
        response: tokio::sync::oneshot::Sender<EngineStatus>,
    },
    /// Shutdown the engine
    Shutdown,
}

/// Status information about the decision engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    pub is_running: bool,
    pub triggers_handled: u64,
    pub scale_requests: u64,
    pub skipped_decisions: u64,
    pub failed_decisions: u64,
    /// Last stamp written by this engine instance
    pub last_scaled: Option<DateTime<Utc>>,
    pub last_outcome: Option<ScaleOutcome>,
}

/// Result of the debounce gate
enum Gate {
    Open(GateClaim),
    Closed(SkipReason),
}

/// What a handler that passed the gate may need to undo
struct GateClaim {
    previous: Option<DateTime<Utc>>,
    /// Stamp written at the gate in compare-and-swap mode
    claimed: Option<DateTime<Utc>>,
}

/// Whether enough time has passed since `last_scaled` to act again.
///
/// Fails open: no stamp, a non-positive window, and a stamp in the future
/// all count as elapsed.
pub fn debounce_elapsed(
    last_scaled: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    wait_time: Duration,
) -> bool {
    let Some(last_scaled) = last_scaled else {
        return true;
    };
    if wait_time <= Duration::zero() {
        return true;
    }

    let waited = now.signed_duration_since(last_scaled);
    waited >= wait_time || waited < Duration::zero()
}

/// Decides whether and how far to scale a worker pool
pub struct DecisionEngine {
    policy: Arc<Policy>,
    callbacks: EngineCallbacks,
    debounce_mode: DebounceMode,
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    command_rx: Option<mpsc::UnboundedReceiver<EngineCommand>>,
    status: Arc<RwLock<EngineStatus>>,
}

impl DecisionEngine {
    /// Create a new decision engine
    pub fn new(policy: Policy, callbacks: EngineCallbacks) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Self {
            policy: Arc::new(policy),
            callbacks,
            debounce_mode: DebounceMode::default(),
            command_tx,
            command_rx: Some(command_rx),
            status: Arc::new(RwLock::new(EngineStatus::default())),
        }
    }

    pub fn with_debounce_mode(mut self, mode: DebounceMode) -> Self {
        self.debounce_mode = mode;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn debounce_mode(&self) -> DebounceMode {
        self.debounce_mode
    }

    /// Get a handle to send commands to the engine
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    pub async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }

    /// Process handle commands until shutdown (consumes self)
    ///
    /// Failed decisions are logged here and never reach whoever sent the
    /// trigger.
    pub async fn start(mut self) -> QueueScaleResult<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| QueueScaleError::engine_not_running("Engine already started"))?;

        self.status.write().await.is_running = true;
        info!(
            app_id = %self.policy.app_id(),
            process_type = %self.policy.process_type(),
            "Decision engine starting..."
        );

        while let Some(command) = command_rx.recv().await {
            match command {
                EngineCommand::Trigger(trigger) => {
                    if let Err(e) = self.handle_trigger(trigger).await {
                        error!(%trigger, "Scaling decision failed: {}", e);
                    }
                }
                EngineCommand::GetStatus { response } => {
                    let status = self.status.read().await.clone();
                    let _ = response.send(status); // Ignore send errors
                }
                EngineCommand::Shutdown => {
                    info!("Shutdown command received");
                    break;
                }
            }
        }

        self.status.write().await.is_running = false;
        info!("Decision engine stopped");
        Ok(())
    }

    /// A job was added to the queue
    pub async fn on_enqueue(&self) -> QueueScaleResult<ScaleOutcome> {
        self.handle_trigger(ScaleTrigger::Enqueued).await
    }

    /// A worker finished a job successfully
    pub async fn on_job_completed(&self) -> QueueScaleResult<ScaleOutcome> {
        self.handle_trigger(ScaleTrigger::Completed).await
    }

    /// A worker finished a job with an error
    pub async fn on_job_failed(&self) -> QueueScaleResult<ScaleOutcome> {
        self.handle_trigger(ScaleTrigger::Failed).await
    }

    /// Run the handler for `trigger`, honoring the kill switch
    pub async fn handle_trigger(&self, trigger: ScaleTrigger) -> QueueScaleResult<ScaleOutcome> {
        let result = if self.policy.scaling_disabled() {
            Ok(ScaleOutcome::Skipped(SkipReason::ScalingDisabled))
        } else {
            match trigger {
                ScaleTrigger::Enqueued => self.scale_on_enqueue_for(trigger).await,
                ScaleTrigger::Completed | ScaleTrigger::Failed | ScaleTrigger::Manual => {
                    self.reconcile_for(trigger).await
                }
            }
        };

        self.record(trigger, &result).await;
        result
    }

    /// Completion/failure path: scale up, or down to the floor only
    pub async fn reconcile(&self) -> QueueScaleResult<ScaleOutcome> {
        self.reconcile_for(ScaleTrigger::Manual).await
    }

    /// Enqueue path: clear stale workers at zero, then scale up
    pub async fn scale_on_enqueue(&self) -> QueueScaleResult<ScaleOutcome> {
        self.scale_on_enqueue_for(ScaleTrigger::Enqueued).await
    }

    /// Ask the provider for `count` workers unless a guard refuses
    pub async fn request_worker_count(&self, count: WorkerCount) -> QueueScaleResult<ScaleOutcome> {
        let (snapshot, current) =
            futures::try_join!(self.callbacks.queue.snapshot(), self.current_worker_count())?;
        self.apply_request(count, current, snapshot, ScaleTrigger::Manual)
            .await
    }

    /// Live worker count from the provider
    pub async fn current_worker_count(&self) -> QueueScaleResult<WorkerCount> {
        self.callbacks
            .scaler
            .current_worker_count(self.policy.app_id(), self.policy.process_type())
            .await
    }

    /// More than one job is being worked right now
    pub async fn jobs_in_progress(&self) -> QueueScaleResult<bool> {
        let working = self.callbacks.queue.working_jobs().await?;
        Ok(working > 1)
    }

    /// Debounce gate, read-only
    pub async fn time_to_scale(&self) -> QueueScaleResult<bool> {
        let last_scaled = self.callbacks.debounce_store.get().await?;
        Ok(debounce_elapsed(
            last_scaled,
            self.callbacks.clock.now(),
            self.policy.wait_time(),
        ))
    }

    async fn reconcile_for(&self, trigger: ScaleTrigger) -> QueueScaleResult<ScaleOutcome> {
        let claim = match self.open_gate().await? {
            Gate::Open(claim) => claim,
            Gate::Closed(reason) => return Ok(ScaleOutcome::Skipped(reason)),
        };

        let result = self.reconcile_decision(trigger).await;
        self.finish(claim, result).await
    }

    async fn reconcile_decision(&self, trigger: ScaleTrigger) -> QueueScaleResult<ScaleOutcome> {
        let (snapshot, current) =
            futures::try_join!(self.callbacks.queue.snapshot(), self.current_worker_count())?;

        let target = self.policy.desired_workers(snapshot.pending_jobs);
        let min_workers = self.policy.min_workers();
        debug!(
            %trigger,
            pending = snapshot.pending_jobs,
            working = snapshot.working_jobs,
            current,
            target,
            min_workers,
            "Reconciling worker count"
        );

        // Frequent completion events never drive an intermediate scale-down.
        if target == i64::from(min_workers) || target > i64::from(current) {
            self.apply_request(clamp_count(target), current, snapshot, trigger)
                .await
        } else {
            Ok(ScaleOutcome::Skipped(SkipReason::NoChangeNeeded { target, current }))
        }
    }

    async fn scale_on_enqueue_for(&self, trigger: ScaleTrigger) -> QueueScaleResult<ScaleOutcome> {
        let claim = match self.open_gate().await? {
            Gate::Open(claim) => claim,
            Gate::Closed(reason) => return Ok(ScaleOutcome::Skipped(reason)),
        };

        let result = self.enqueue_decision(trigger).await;
        self.finish(claim, result).await
    }

    async fn enqueue_decision(&self, trigger: ScaleTrigger) -> QueueScaleResult<ScaleOutcome> {
        let current = self.current_worker_count().await?;
        if current == 0 {
            self.clear_stale_workers().await?;
        }

        let snapshot = self.callbacks.queue.snapshot().await?;
        let target = self.policy.desired_workers(snapshot.pending_jobs);
        let min_workers = self.policy.min_workers();
        debug!(
            %trigger,
            pending = snapshot.pending_jobs,
            working = snapshot.working_jobs,
            current,
            target,
            min_workers,
            "Evaluating enqueue"
        );

        if current == 0 || target > i64::from(current) {
            let count = clamp_count(target.max(i64::from(min_workers)));
            self.apply_request(count, current, snapshot, trigger).await
        } else {
            Ok(ScaleOutcome::Skipped(SkipReason::NoChangeNeeded { target, current }))
        }
    }

    /// The only write path to the provider
    async fn apply_request(
        &self,
        count: WorkerCount,
        current: WorkerCount,
        snapshot: QueueSnapshot,
        trigger: ScaleTrigger,
    ) -> QueueScaleResult<ScaleOutcome> {
        if count == current {
            return Ok(ScaleOutcome::Skipped(SkipReason::AlreadyAtTarget { count }));
        }
        if snapshot.jobs_in_progress() && count < current {
            debug!(
                requested = count,
                current,
                working = snapshot.working_jobs,
                "Refusing scale-down while jobs are in progress"
            );
            return Ok(ScaleOutcome::Skipped(SkipReason::JobsInProgress {
                requested: count,
                current,
                working_jobs: snapshot.working_jobs,
            }));
        }

        let request = ScaleRequest {
            app_id: self.policy.app_id().to_string(),
            process_type: self.policy.process_type().to_string(),
            from: current,
            to: count,
            trigger,
            timestamp: self.callbacks.clock.now(),
        };

        match self
            .callbacks
            .scaler
            .set_worker_count(&request.app_id, &request.process_type, count)
            .await
        {
            Ok(()) => {
                for observer in &self.callbacks.observers {
                    if let Err(e) = observer.on_scale_requested(&request).await {
                        warn!("Observer error on scale requested: {}", e);
                    }
                }
                Ok(ScaleOutcome::Scaled { from: current, to: count })
            }
            Err(e) => {
                for observer in &self.callbacks.observers {
                    if let Err(err) = observer.on_scale_error(&request, &e).await {
                        warn!("Observer error on scale error: {}", err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Deregister every stale registry entry
    async fn clear_stale_workers(&self) -> QueueScaleResult<Vec<WorkerRecord>> {
        let workers = self.callbacks.registry.list_stale_workers().await?;
        for worker in &workers {
            self.callbacks.registry.deregister(worker).await?;
        }

        debug!(count = workers.len(), "Cleared stale workers");
        for observer in &self.callbacks.observers {
            if let Err(e) = observer.on_stale_workers_cleared(&workers).await {
                warn!("Observer error on stale workers cleared: {}", e);
            }
        }
        Ok(workers)
    }

    async fn open_gate(&self) -> QueueScaleResult<Gate> {
        let store = &self.callbacks.debounce_store;
        let last_scaled = store.get().await?;
        let now = self.callbacks.clock.now();
        let wait_time = self.policy.wait_time();

        if !debounce_elapsed(last_scaled, now, wait_time) {
            debug!(?last_scaled, %now, "Within debounce window");
            return Ok(Gate::Closed(SkipReason::Debounced));
        }

        let unclaimed = GateClaim {
            previous: last_scaled,
            claimed: None,
        };
        if self.debounce_mode == DebounceMode::ReadThenWrite || wait_time <= Duration::zero() {
            return Ok(Gate::Open(unclaimed));
        }

        if store.compare_and_set(last_scaled, now).await? {
            Ok(Gate::Open(GateClaim {
                previous: last_scaled,
                claimed: Some(now),
            }))
        } else {
            debug!("Another handler claimed the debounce window");
            Ok(Gate::Closed(SkipReason::LostDebounceRace))
        }
    }

    /// Stamp on success; on failure leave the stamp as it was before the gate
    async fn finish(
        &self,
        claim: GateClaim,
        result: QueueScaleResult<ScaleOutcome>,
    ) -> QueueScaleResult<ScaleOutcome> {
        match result {
            Ok(outcome) => {
                let now = self.callbacks.clock.now();
                self.callbacks.debounce_store.set(now).await?;
                self.status.write().await.last_scaled = Some(now);
                Ok(outcome)
            }
            Err(e) => {
                self.release(claim).await;
                Err(e)
            }
        }
    }

    async fn release(&self, claim: GateClaim) {
        let Some(claimed) = claim.claimed else {
            return;
        };

        let store = &self.callbacks.debounce_store;
        let restored = match claim.previous {
            Some(previous) => store.compare_and_set(Some(claimed), previous).await,
            None => match store.get().await {
                Ok(current) if current == Some(claimed) => store.clear().await.map(|_| true),
                Ok(_) => Ok(false),
                Err(e) => Err(e),
            },
        };

        if let Err(e) = restored {
            warn!("Failed to release debounce claim: {}", e);
        }
    }

    async fn record(&self, trigger: ScaleTrigger, result: &QueueScaleResult<ScaleOutcome>) {
        {
            let mut status = self.status.write().await;
            status.triggers_handled += 1;
            match result {
                Ok(outcome) => {
                    if outcome.is_scaled() {
                        status.scale_requests += 1;
                    } else {
                        status.skipped_decisions += 1;
                    }
                    status.last_outcome = Some(outcome.clone());
                }
                Err(_) => status.failed_decisions += 1,
            }
        }

        if let Ok(ScaleOutcome::Skipped(reason)) = result {
            for observer in &self.callbacks.observers {
                if let Err(e) = observer.on_scale_skipped(trigger, reason).await {
                    warn!("Observer error on scale skipped: {}", e);
                }
            }
        }
    }
}

/// Handle for feeding job lifecycle events to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    /// Queue a trigger without waiting for the decision
    pub fn notify(&self, trigger: ScaleTrigger) -> QueueScaleResult<()> {
        self.command_tx.send(EngineCommand::Trigger(trigger))?;
        Ok(())
    }

    pub fn job_enqueued(&self) -> QueueScaleResult<()> {
        self.notify(ScaleTrigger::Enqueued)
    }

    pub fn job_completed(&self) -> QueueScaleResult<()> {
        self.notify(ScaleTrigger::Completed)
    }

    pub fn job_failed(&self) -> QueueScaleResult<()> {
        self.notify(ScaleTrigger::Failed)
    }

    /// Get current engine status
    pub async fn status(&self) -> QueueScaleResult<EngineStatus> {
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(EngineCommand::GetStatus {
            response: response_tx,
        })?;
        Ok(response_rx.await?)
    }

    /// Shutdown the engine
    pub async fn shutdown(&self) -> QueueScaleResult<()> {
        self.command_tx.send(EngineCommand::Shutdown)?;
        Ok(())
    }
}
