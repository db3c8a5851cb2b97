use metric::{Metric, Registry, U64Counter};

use crate::AttemptError;

pub(crate) const DOWNLOAD_ATTEMPTS_NAME: &str = "distributor_download_attempts";
pub(crate) const DOWNLOAD_TASKS_NAME: &str = "distributor_download_tasks";
pub(crate) const DEDUP_JOINS_NAME: &str = "distributor_download_dedup_joins";

#[derive(Debug)]
pub(crate) struct DownloadMetrics {
    attempt_success: U64Counter,
    attempt_unavailable: U64Counter,
    attempt_timeout: U64Counter,
    attempt_integrity: U64Counter,
    task_succeeded: U64Counter,
    task_failed: U64Counter,
    task_cancelled: U64Counter,
    dedup_joins: U64Counter,
}

impl DownloadMetrics {
    pub(crate) fn new(registry: &Registry) -> Self {
        let attempts: Metric<U64Counter> = registry.register_metric(
            DOWNLOAD_ATTEMPTS_NAME,
            "download attempts against a single origin endpoint, by result",
        );
        let tasks: Metric<U64Counter> = registry.register_metric(
            DOWNLOAD_TASKS_NAME,
            "object downloads completed, by result",
        );
        let dedup_joins: Metric<U64Counter> = registry.register_metric(
            DEDUP_JOINS_NAME,
            "requests that joined a download already in flight",
        );
        Self {
            attempt_success: attempts.recorder(&[("result", "success")]),
            attempt_unavailable: attempts.recorder(&[("result", "unavailable")]),
            attempt_timeout: attempts.recorder(&[("result", "timeout")]),
            attempt_integrity: attempts.recorder(&[("result", "integrity")]),
            task_succeeded: tasks.recorder(&[("result", "succeeded")]),
            task_failed: tasks.recorder(&[("result", "failed")]),
            task_cancelled: tasks.recorder(&[("result", "cancelled")]),
            dedup_joins: dedup_joins.recorder([]),
        }
    }

    pub(crate) fn attempt_succeeded(&self) {
        self.attempt_success.inc(1);
    }

    pub(crate) fn attempt_failed(&self, error: &AttemptError) {
        match error {
            AttemptError::Unavailable(_) | AttemptError::Storage(_) => {
                self.attempt_unavailable.inc(1)
            }
            AttemptError::Timeout(_) => self.attempt_timeout.inc(1),
            AttemptError::IntegrityMismatch(_) => self.attempt_integrity.inc(1),
        }
    }

    pub(crate) fn task_succeeded(&self) {
        self.task_succeeded.inc(1);
    }

    pub(crate) fn task_failed(&self) {
        self.task_failed.inc(1);
    }

    pub(crate) fn task_cancelled(&self) {
        self.task_cancelled.inc(1);
    }

    pub(crate) fn dedup_join(&self) {
        self.dedup_joins.inc(1);
    }
}
