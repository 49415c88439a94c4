//! Utility functions for common operations

use regex::Regex;

use crate::error::{QueueScaleError, QueueScaleResult};
use crate::types::{QueueSnapshot, WorkerCount};

/// Matches process names of the form `<process_type>.<n>` (e.g. `worker.3`)
#[derive(Debug, Clone)]
pub struct ProcessMatcher {
    pattern: Regex,
}

impl ProcessMatcher {
    pub fn new(process_type: &str) -> QueueScaleResult<Self> {
        if process_type.is_empty() {
            return Err(QueueScaleError::invalid_policy("process_type must not be empty"));
        }
        let pattern = Regex::new(&format!(r"{}\.\d+", regex::escape(process_type)))
            .map_err(|e| QueueScaleError::invalid_policy(e.to_string()))?;
        Ok(Self { pattern })
    }

    pub fn is_match(&self, process_name: &str) -> bool {
        self.pattern.is_match(process_name)
    }

    /// Count matching names in a provider's process listing
    pub fn count<'a, I>(&self, process_names: I) -> WorkerCount
    where
        I: IntoIterator<Item = &'a str>,
    {
        let count = process_names
            .into_iter()
            .filter(|name| self.is_match(name))
            .count();
        WorkerCount::try_from(count).unwrap_or(WorkerCount::MAX)
    }
}

/// Count running processes of `process_type` in a process listing
///
/// Useful when implementing a `Scaler` over an API that lists processes
/// by name rather than reporting a count.
pub fn count_matching_processes<'a, I>(process_names: I, process_type: &str) -> QueueScaleResult<WorkerCount>
where
    I: IntoIterator<Item = &'a str>,
{
    Ok(ProcessMatcher::new(process_type)?.count(process_names))
}

/// Create a QueueSnapshot
pub fn snapshot(pending_jobs: u64, working_jobs: u64) -> QueueSnapshot {
    QueueSnapshot::new(pending_jobs, working_jobs)
}
