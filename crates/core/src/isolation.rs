//! Per-repository failure domains for batch runs.
//!
//! Every repository runs inside its own boundary: an error or a panic in
//! one repository is turned into a failed [`RepositoryReport`] and handled
//! according to the configured [`ErrorDisposition`]. It never reaches a
//! sibling repository.

use std::panic::{self, AssertUnwindSafe};

use tracing::{error, info, warn};

use crate::config::ErrorDisposition;
use crate::errors::SyncError;
use crate::models::{BatchReport, Direction, Notification, Repository, RepositoryReport};

/// Runs repositories one after another under a failure disposition.
#[derive(Debug, Clone, Copy)]
pub struct FailureIsolation {
    direction: Direction,
    disposition: ErrorDisposition,
}

impl FailureIsolation {
    pub fn new(direction: Direction, disposition: ErrorDisposition) -> Self {
        Self {
            direction,
            disposition,
        }
    }

    /// Run `cycle` for each repository in order.
    pub fn run<F>(&self, repositories: &[Repository], mut cycle: F) -> BatchReport
    where
        F: FnMut(&Repository) -> Result<RepositoryReport, SyncError>,
    {
        let mut batch = BatchReport::default();

        for repo in repositories {
            let report = match panic::catch_unwind(AssertUnwindSafe(|| cycle(repo))) {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => RepositoryReport::failed(&repo.name, self.direction, e),
                Err(payload) => RepositoryReport::failed(
                    &repo.name,
                    self.direction,
                    SyncError::Panicked(panic_message(payload.as_ref())),
                ),
            };

            if report.is_success() {
                info!(repository = %repo.name, direction = %self.direction, "repository synchronized");
                batch.repositories.push(report);
                continue;
            }

            let detail = report.failure_detail();
            error!(
                repository = %repo.name,
                direction = %self.direction,
                disposition = %self.disposition,
                detail = %detail,
                "repository failed"
            );
            batch.repositories.push(report);

            match self.disposition {
                ErrorDisposition::Abort => {
                    warn!("aborting batch");
                    batch.aborted = true;
                    break;
                }
                ErrorDisposition::Continue => {}
                ErrorDisposition::Notify => {
                    batch.notifications.push(Notification::new(
                        format!("cvsgitsync: {} failed for {}", self.direction, repo.name),
                        detail,
                    ));
                }
            }
        }

        batch
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
