//! Prometheus counters for scaling decisions

use async_trait::async_trait;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::callbacks::ScalingObserver;
use crate::error::{QueueScaleError, QueueScaleResult};
use crate::types::{ScaleRequest, ScaleTrigger, SkipReason, WorkerRecord};

/// Observer that counts scaling events in a Prometheus registry
#[derive(Clone)]
pub struct PrometheusObserver {
    scale_requests: IntCounterVec,
    scale_skipped: IntCounterVec,
    scale_errors: IntCounterVec,
    stale_workers_cleared: IntCounter,
}

impl PrometheusObserver {
    /// Create the counters and register them with `registry`
    pub fn new(registry: &Registry) -> QueueScaleResult<Self> {
        let scale_requests = IntCounterVec::new(
            Opts::new(
                "queuescale_scale_requests_total",
                "Worker counts accepted by the scaling provider",
            ),
            &["trigger"],
        )
        .map_err(metrics_error)?;
        let scale_skipped = IntCounterVec::new(
            Opts::new(
                "queuescale_scale_skipped_total",
                "Decisions that ended without a provider call",
            ),
            &["reason"],
        )
        .map_err(metrics_error)?;
        let scale_errors = IntCounterVec::new(
            Opts::new(
                "queuescale_scale_errors_total",
                "Provider calls that failed",
            ),
            &["trigger"],
        )
        .map_err(metrics_error)?;
        let stale_workers_cleared = IntCounter::new(
            "queuescale_stale_workers_cleared_total",
            "Stale worker registrations removed before scaling from zero",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(scale_requests.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(scale_skipped.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(scale_errors.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(stale_workers_cleared.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            scale_requests,
            scale_skipped,
            scale_errors,
            stale_workers_cleared,
        })
    }
}

fn metrics_error(error: prometheus::Error) -> QueueScaleError {
    QueueScaleError::config(format!("metrics registration failed: {}", error))
}

#[async_trait]
impl ScalingObserver for PrometheusObserver {
    async fn on_scale_requested(&self, request: &ScaleRequest) -> QueueScaleResult<()> {
        self.scale_requests
            .with_label_values(&[request.trigger.as_str()])
            .inc();
        Ok(())
    }

    async fn on_scale_skipped(
        &self,
        _trigger: ScaleTrigger,
        reason: &SkipReason,
    ) -> QueueScaleResult<()> {
        self.scale_skipped.with_label_values(&[reason.label()]).inc();
        Ok(())
    }

    async fn on_scale_error(
        &self,
        request: &ScaleRequest,
        _error: &QueueScaleError,
    ) -> QueueScaleResult<()> {
        self.scale_errors
            .with_label_values(&[request.trigger.as_str()])
            .inc();
        Ok(())
    }

    async fn on_stale_workers_cleared(&self, workers: &[WorkerRecord]) -> QueueScaleResult<()> {
        self.stale_workers_cleared.inc_by(workers.len() as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_skips_by_reason() {
        let registry = Registry::new();
        let observer = PrometheusObserver::new(&registry).unwrap();

        observer
            .on_scale_skipped(ScaleTrigger::Completed, &SkipReason::Debounced)
            .await
            .unwrap();
        observer
            .on_scale_skipped(ScaleTrigger::Enqueued, &SkipReason::Debounced)
            .await
            .unwrap();

        assert_eq!(
            observer
                .scale_skipped
                .with_label_values(&["debounced"])
                .get(),
            2
        );
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        PrometheusObserver::new(&registry).unwrap();
        assert!(PrometheusObserver::new(&registry).is_err());
    }
}
