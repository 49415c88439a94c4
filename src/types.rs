// src/types.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QueueScaleError, QueueScaleResult};

/// Number of running worker processes for a process type
pub type WorkerCount = u32;

/// Prefix for environment-based policy configuration
pub const ENV_PREFIX: &str = "QUEUESCALE_";

/// Default process type targeted at the provider
pub const DEFAULT_PROCESS_TYPE: &str = "worker";

/// Default debounce window in seconds
pub const DEFAULT_WAIT_TIME_SECONDS: i64 = 60;

/// Point-in-time view of the job queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Jobs enqueued but not yet claimed by a worker
    pub pending_jobs: u64,
    /// Jobs currently being worked
    pub working_jobs: u64,
}

impl QueueSnapshot {
    pub fn new(pending_jobs: u64, working_jobs: u64) -> Self {
        Self {
            pending_jobs,
            working_jobs,
        }
    }

    /// More than one job is being worked.
    ///
    /// A single in-flight job is tolerated and does not block a scale-down.
    pub fn jobs_in_progress(&self) -> bool {
        self.working_jobs > 1
    }
}

/// A worker entry in the queue's registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Registry identifier (e.g., "host:pid:queues")
    pub id: String,
    /// Host the worker registered from, if known
    pub hostname: Option<String>,
    /// Process id of the worker, if known
    pub pid: Option<u32>,
}

impl WorkerRecord {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            hostname: None,
            pid: None,
        }
    }
}

/// The job lifecycle event that invoked the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleTrigger {
    /// A job was added to the queue
    Enqueued,
    /// A worker finished a job successfully
    Completed,
    /// A worker finished a job with an error
    Failed,
    /// A direct call outside the job lifecycle
    Manual,
}

impl ScaleTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ScaleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a decision ended without a provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The policy kill switch is on
    ScalingDisabled,
    /// The debounce window has not elapsed since the last stamp
    Debounced,
    /// Another handler claimed the debounce window first
    LostDebounceRace,
    /// The target does not justify a change on this path
    NoChangeNeeded { target: i64, current: WorkerCount },
    /// The requested count equals the running count
    AlreadyAtTarget { count: WorkerCount },
    /// A scale-down was refused because jobs are being worked
    JobsInProgress {
        requested: WorkerCount,
        current: WorkerCount,
        working_jobs: u64,
    },
}

impl SkipReason {
    /// Short stable label, suitable for metric labels
    pub fn label(&self) -> &'static str {
        match self {
            Self::ScalingDisabled => "scaling_disabled",
            Self::Debounced => "debounced",
            Self::LostDebounceRace => "lost_debounce_race",
            Self::NoChangeNeeded { .. } => "no_change_needed",
            Self::AlreadyAtTarget { .. } => "already_at_target",
            Self::JobsInProgress { .. } => "jobs_in_progress",
        }
    }
}

/// A request issued to the scaling provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub app_id: String,
    pub process_type: String,
    /// Running workers when the decision was made
    pub from: WorkerCount,
    /// Requested worker count
    pub to: WorkerCount,
    pub trigger: ScaleTrigger,
    pub timestamp: DateTime<Utc>,
}

/// Result of one pass through a trigger handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScaleOutcome {
    /// The provider was asked to run `to` workers
    Scaled { from: WorkerCount, to: WorkerCount },
    /// No provider call was made
    Skipped(SkipReason),
}

impl ScaleOutcome {
    pub fn is_scaled(&self) -> bool {
        matches!(self, Self::Scaled { .. })
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skipped(reason) => Some(reason),
            Self::Scaled { .. } => None,
        }
    }
}

/// One step of a tiered worker curve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTier {
    /// Tier applies once at least this many jobs are pending
    pub min_pending: u64,
    /// Workers wanted within this tier
    pub workers: WorkerCount,
}

/// Serializable description of the desired-worker function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerCurve {
    /// One worker while anything is pending, none otherwise
    OneWhenPending,
    /// `ceil(pending / jobs_per_worker)`, clamped to the bounds
    JobsPerWorker {
        jobs_per_worker: u64,
        #[serde(default)]
        min_workers: WorkerCount,
        #[serde(default)]
        max_workers: Option<WorkerCount>,
    },
    /// The highest tier whose `min_pending` has been reached; zero below every tier
    Tiered { tiers: Vec<WorkerTier> },
}

impl Default for WorkerCurve {
    fn default() -> Self {
        Self::OneWhenPending
    }
}

impl WorkerCurve {
    /// Check that the curve can be evaluated
    pub fn validate(&self) -> QueueScaleResult<()> {
        match self {
            Self::OneWhenPending => Ok(()),
            Self::JobsPerWorker {
                jobs_per_worker,
                min_workers,
                max_workers,
            } => {
                if *jobs_per_worker == 0 {
                    return Err(QueueScaleError::invalid_policy(
                        "jobs_per_worker must be greater than zero",
                    ));
                }
                if let Some(max) = max_workers {
                    if max < min_workers {
                        return Err(QueueScaleError::invalid_policy(format!(
                            "max_workers ({}) is below min_workers ({})",
                            max, min_workers
                        )));
                    }
                }
                Ok(())
            }
            Self::Tiered { tiers } => {
                if tiers.is_empty() {
                    return Err(QueueScaleError::invalid_policy(
                        "tiered worker curve needs at least one tier",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Evaluate the curve for a pending-job count
    pub fn desired_workers(&self, pending_jobs: u64) -> i64 {
        match self {
            Self::OneWhenPending => i64::from(pending_jobs > 0),
            Self::JobsPerWorker {
                jobs_per_worker,
                min_workers,
                max_workers,
            } => {
                let raw = pending_jobs.div_ceil((*jobs_per_worker).max(1));
                let mut count = i64::try_from(raw).unwrap_or(i64::MAX);
                count = count.max(i64::from(*min_workers));
                if let Some(max) = max_workers {
                    count = count.min(i64::from(*max));
                }
                count
            }
            Self::Tiered { tiers } => tiers
                .iter()
                .filter(|tier| tier.min_pending <= pending_jobs)
                .max_by_key(|tier| tier.min_pending)
                .map(|tier| i64::from(tier.workers))
                .unwrap_or(0),
        }
    }
}

fn default_process_type() -> String {
    DEFAULT_PROCESS_TYPE.to_string()
}

fn default_wait_time_seconds() -> i64 {
    DEFAULT_WAIT_TIME_SECONDS
}

/// Declarative policy configuration, loadable from JSON, TOML, or the environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Application identifier at the scaling provider
    pub app_id: String,
    /// Process type whose count is scaled
    #[serde(default = "default_process_type")]
    pub process_type: String,
    /// Debounce window; zero or negative disables debouncing
    #[serde(default = "default_wait_time_seconds")]
    pub wait_time_seconds: i64,
    /// Global kill switch
    #[serde(default)]
    pub scaling_disabled: bool,
    /// Mapping from pending jobs to workers
    #[serde(default)]
    pub worker_curve: WorkerCurve,
}

impl PolicyConfig {
    pub fn new<S: Into<String>>(app_id: S) -> Self {
        Self {
            app_id: app_id.into(),
            process_type: default_process_type(),
            wait_time_seconds: DEFAULT_WAIT_TIME_SECONDS,
            scaling_disabled: false,
            worker_curve: WorkerCurve::default(),
        }
    }

    pub fn from_json_str(input: &str) -> QueueScaleResult<Self> {
        Ok(serde_json::from_str(input)?)
    }

    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(input: &str) -> QueueScaleResult<Self> {
        toml::from_str(input).map_err(|e| QueueScaleError::config(e.to_string()))
    }

    /// Read `QUEUESCALE_*` variables from the process environment
    pub fn from_env() -> QueueScaleResult<Self> {
        Self::from_env_vars(std::env::vars())
    }

    /// Build a config from `QUEUESCALE_*` key/value pairs.
    ///
    /// `APP_ID` is required. `PROCESS_TYPE`, `WAIT_TIME` (seconds) and
    /// `SCALING_DISABLED` (true/false/1/0) fall back to defaults. The worker
    /// curve is always the default one; use a config file for anything else.
    pub fn from_env_vars<I, K, V>(vars: I) -> QueueScaleResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(k, v)| {
                k.as_ref()
                    .strip_prefix(ENV_PREFIX)
                    .map(|key| (key.to_string(), v.into()))
            })
            .collect();

        let app_id = vars
            .get("APP_ID")
            .cloned()
            .ok_or_else(|| QueueScaleError::config(format!("{}APP_ID is not set", ENV_PREFIX)))?;

        let mut config = Self::new(app_id);

        if let Some(process_type) = vars.get("PROCESS_TYPE") {
            config.process_type = process_type.clone();
        }

        if let Some(wait_time) = vars.get("WAIT_TIME") {
            config.wait_time_seconds = wait_time.trim().parse().map_err(|_| {
                QueueScaleError::invalid_policy(format!(
                    "{}WAIT_TIME must be a whole number of seconds, got '{}'",
                    ENV_PREFIX, wait_time
                ))
            })?;
        }

        if let Some(disabled) = vars.get("SCALING_DISABLED") {
            config.scaling_disabled = parse_flag(disabled).ok_or_else(|| {
                QueueScaleError::invalid_policy(format!(
                    "{}SCALING_DISABLED must be true or false, got '{}'",
                    ENV_PREFIX, disabled
                ))
            })?;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_when_pending_curve() {
        let curve = WorkerCurve::OneWhenPending;
        assert_eq!(curve.desired_workers(0), 0);
        assert_eq!(curve.desired_workers(1), 1);
        assert_eq!(curve.desired_workers(500), 1);
    }

    #[test]
    fn jobs_per_worker_rounds_up_and_clamps() {
        let curve = WorkerCurve::JobsPerWorker {
            jobs_per_worker: 5,
            min_workers: 1,
            max_workers: Some(4),
        };
        assert_eq!(curve.desired_workers(0), 1);
        assert_eq!(curve.desired_workers(5), 1);
        assert_eq!(curve.desired_workers(6), 2);
        assert_eq!(curve.desired_workers(12), 3);
        assert_eq!(curve.desired_workers(1_000), 4);
    }

    #[test]
    fn tiered_curve_picks_highest_reached_tier() {
        let curve = WorkerCurve::Tiered {
            tiers: vec![
                WorkerTier { min_pending: 100, workers: 5 },
                WorkerTier { min_pending: 1, workers: 1 },
                WorkerTier { min_pending: 25, workers: 2 },
            ],
        };
        assert_eq!(curve.desired_workers(0), 0);
        assert_eq!(curve.desired_workers(24), 1);
        assert_eq!(curve.desired_workers(25), 2);
        assert_eq!(curve.desired_workers(250), 5);
    }

    #[test]
    fn curve_validation() {
        assert!(WorkerCurve::JobsPerWorker {
            jobs_per_worker: 0,
            min_workers: 0,
            max_workers: None
        }
        .validate()
        .is_err());
        assert!(WorkerCurve::JobsPerWorker {
            jobs_per_worker: 10,
            min_workers: 3,
            max_workers: Some(2)
        }
        .validate()
        .is_err());
        assert!(WorkerCurve::Tiered { tiers: vec![] }.validate().is_err());
        assert!(WorkerCurve::OneWhenPending.validate().is_ok());
    }

    #[test]
    fn config_from_json_applies_defaults() {
        let config = PolicyConfig::from_json_str(r#"{ "app_id": "billing" }"#).unwrap();
        assert_eq!(config.app_id, "billing");
        assert_eq!(config.process_type, "worker");
        assert_eq!(config.wait_time_seconds, 60);
        assert!(!config.scaling_disabled);
        assert_eq!(config.worker_curve, WorkerCurve::OneWhenPending);
    }

    #[test]
    fn config_from_json_with_curve() {
        let config = PolicyConfig::from_json_str(
            r#"{
                "app_id": "billing",
                "process_type": "mailer",
                "wait_time_seconds": 0,
                "worker_curve": { "kind": "jobs_per_worker", "jobs_per_worker": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.process_type, "mailer");
        assert_eq!(config.wait_time_seconds, 0);
        assert_eq!(
            config.worker_curve,
            WorkerCurve::JobsPerWorker {
                jobs_per_worker: 5,
                min_workers: 0,
                max_workers: None
            }
        );
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn config_from_toml() {
        let config = PolicyConfig::from_toml_str(
            r#"
            app_id = "billing"
            wait_time_seconds = 30

            [worker_curve]
            kind = "tiered"
            tiers = [
                { min_pending = 1, workers = 1 },
                { min_pending = 50, workers = 3 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(config.wait_time_seconds, 30);
        assert_eq!(config.worker_curve.desired_workers(60), 3);
    }

    #[test]
    fn config_from_env_vars() {
        let config = PolicyConfig::from_env_vars(vec![
            ("QUEUESCALE_APP_ID", "billing"),
            ("QUEUESCALE_PROCESS_TYPE", "urgent"),
            ("QUEUESCALE_WAIT_TIME", "15"),
            ("QUEUESCALE_SCALING_DISABLED", "TRUE"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();
        assert_eq!(config.app_id, "billing");
        assert_eq!(config.process_type, "urgent");
        assert_eq!(config.wait_time_seconds, 15);
        assert!(config.scaling_disabled);
    }

    #[test]
    fn config_from_env_vars_rejects_bad_values() {
        let missing = PolicyConfig::from_env_vars(Vec::<(String, String)>::new());
        assert!(matches!(missing, Err(QueueScaleError::Config { .. })));

        let bad_flag = PolicyConfig::from_env_vars(vec![
            ("QUEUESCALE_APP_ID", "billing"),
            ("QUEUESCALE_SCALING_DISABLED", "maybe"),
        ]);
        assert!(matches!(bad_flag, Err(QueueScaleError::InvalidPolicy { .. })));

        let bad_wait = PolicyConfig::from_env_vars(vec![
            ("QUEUESCALE_APP_ID", "billing"),
            ("QUEUESCALE_WAIT_TIME", "soon"),
        ]);
        assert!(matches!(bad_wait, Err(QueueScaleError::InvalidPolicy { .. })));
    }

    #[test]
    fn outcome_serializes_with_reason_tag() {
        let outcome = ScaleOutcome::Skipped(SkipReason::AlreadyAtTarget { count: 2 });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "already_at_target");
        assert_eq!(json["count"], 2);
    }
}
