//! Scaling policy: the desired-worker function plus its constraints

use std::fmt;
use std::sync::Arc;

use chrono::Duration;

use crate::error::{QueueScaleError, QueueScaleResult};
use crate::types::{PolicyConfig, WorkerCount, WorkerCurve, DEFAULT_PROCESS_TYPE, DEFAULT_WAIT_TIME_SECONDS};

/// Maps a pending-job count to a target worker count
///
/// Expected to be non-decreasing in its argument. May return negative
/// values; the floor is clamped at zero.
pub type DesiredWorkersFn = Arc<dyn Fn(u64) -> i64 + Send + Sync>;

/// Immutable scaling policy handed to the engine at construction
#[derive(Clone)]
pub struct Policy {
    desired_workers: DesiredWorkersFn,
    wait_time: Duration,
    scaling_disabled: bool,
    app_id: String,
    process_type: String,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("app_id", &self.app_id)
            .field("process_type", &self.process_type)
            .field("wait_time", &self.wait_time)
            .field("scaling_disabled", &self.scaling_disabled)
            .field("min_workers", &self.min_workers())
            .finish_non_exhaustive()
    }
}

impl Policy {
    pub fn builder<S: Into<String>>(app_id: S) -> PolicyBuilder {
        PolicyBuilder::new(app_id)
    }

    /// Build a policy from declarative configuration
    pub fn from_config(config: PolicyConfig) -> QueueScaleResult<Self> {
        Self::builder(config.app_id)
            .process_type(config.process_type)
            .wait_time_seconds(config.wait_time_seconds)
            .scaling_disabled(config.scaling_disabled)
            .worker_curve(config.worker_curve)
            .build()
    }

    /// Target worker count for `pending_jobs`, unadjusted
    pub fn desired_workers(&self, pending_jobs: u64) -> i64 {
        (self.desired_workers)(pending_jobs)
    }

    /// `max(desired_workers(0), 0)`
    pub fn min_workers(&self) -> WorkerCount {
        clamp_count(self.desired_workers(0))
    }

    /// Debounce window; zero or negative disables debouncing
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn scaling_disabled(&self) -> bool {
        self.scaling_disabled
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }
}

/// Clamp a policy value into the worker-count range
pub(crate) fn clamp_count(value: i64) -> WorkerCount {
    WorkerCount::try_from(value.max(0)).unwrap_or(WorkerCount::MAX)
}

enum WaitTime {
    Duration(Duration),
    Seconds(i64),
}

/// Builder for [`Policy`]
pub struct PolicyBuilder {
    app_id: String,
    process_type: String,
    wait_time: WaitTime,
    scaling_disabled: bool,
    desired_workers: Option<DesiredWorkersFn>,
    curve: Option<WorkerCurve>,
}

impl PolicyBuilder {
    pub fn new<S: Into<String>>(app_id: S) -> Self {
        Self {
            app_id: app_id.into(),
            process_type: DEFAULT_PROCESS_TYPE.to_string(),
            wait_time: WaitTime::Seconds(DEFAULT_WAIT_TIME_SECONDS),
            scaling_disabled: false,
            desired_workers: None,
            curve: None,
        }
    }

    pub fn process_type<S: Into<String>>(mut self, process_type: S) -> Self {
        self.process_type = process_type.into();
        self
    }

    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = WaitTime::Duration(wait_time);
        self
    }

    /// `build()` fails if `seconds` does not fit in a `chrono::Duration`
    pub fn wait_time_seconds(mut self, seconds: i64) -> Self {
        self.wait_time = WaitTime::Seconds(seconds);
        self
    }

    pub fn scaling_disabled(mut self, disabled: bool) -> Self {
        self.scaling_disabled = disabled;
        self
    }

    /// Use an arbitrary function; replaces any curve set earlier
    pub fn desired_workers<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) -> i64 + Send + Sync + 'static,
    {
        self.desired_workers = Some(Arc::new(f));
        self.curve = None;
        self
    }

    /// Use a declarative curve; replaces any function set earlier
    pub fn worker_curve(mut self, curve: WorkerCurve) -> Self {
        self.curve = Some(curve);
        self.desired_workers = None;
        self
    }

    pub fn build(self) -> QueueScaleResult<Policy> {
        if self.app_id.trim().is_empty() {
            return Err(QueueScaleError::invalid_policy("app_id must not be empty"));
        }
        if self.process_type.trim().is_empty() {
            return Err(QueueScaleError::invalid_policy("process_type must not be empty"));
        }

        let wait_time = match self.wait_time {
            WaitTime::Duration(wait_time) => wait_time,
            WaitTime::Seconds(seconds) => Duration::try_seconds(seconds).ok_or_else(|| {
                QueueScaleError::invalid_policy(format!("wait_time_seconds out of range: {}", seconds))
            })?,
        };

        let desired_workers = match (self.desired_workers, self.curve) {
            (Some(f), _) => f,
            (None, Some(curve)) => {
                curve.validate()?;
                Arc::new(move |pending: u64| curve.desired_workers(pending)) as DesiredWorkersFn
            }
            (None, None) => {
                return Err(QueueScaleError::invalid_policy(
                    "no desired_workers function or worker curve was provided",
                ))
            }
        };

        Ok(Policy {
            desired_workers,
            wait_time,
            scaling_disabled: self.scaling_disabled,
            app_id: self.app_id,
            process_type: self.process_type,
        })
    }
}

/// `ceil(pending / jobs_per_worker)` with no bounds
pub fn jobs_per_worker_policy<S: Into<String>>(
    app_id: S,
    jobs_per_worker: u64,
    wait_time_seconds: i64,
) -> QueueScaleResult<Policy> {
    Policy::builder(app_id)
        .wait_time_seconds(wait_time_seconds)
        .worker_curve(WorkerCurve::JobsPerWorker {
            jobs_per_worker,
            min_workers: 0,
            max_workers: None,
        })
        .build()
}

/// One worker while anything is pending, scaled to zero when idle
pub fn one_when_pending_policy<S: Into<String>>(app_id: S) -> QueueScaleResult<Policy> {
    Policy::builder(app_id)
        .worker_curve(WorkerCurve::OneWhenPending)
        .build()
}
