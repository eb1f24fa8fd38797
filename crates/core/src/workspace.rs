//! Scoped cleanup of the Git working area.

use tracing::{debug, error};

use crate::errors::GitError;
use crate::vcs::TargetBackend;

/// Returns the Git working area to pristine when the cycle ends.
///
/// Call [`finish`](Self::finish) on the success path to observe cleanup
/// errors. If the guard is dropped instead (early return, `?`, panic), the
/// cleanup still runs and any error is logged.
pub struct PristineGuard<'a, T: TargetBackend + ?Sized> {
    target: &'a T,
    armed: bool,
}

impl<'a, T: TargetBackend + ?Sized> PristineGuard<'a, T> {
    pub fn new(target: &'a T) -> Self {
        Self {
            target,
            armed: true,
        }
    }

    /// Clean now and disarm.
    pub fn finish(mut self) -> Result<(), GitError> {
        self.armed = false;
        self.target.clean_to_pristine()
    }
}

impl<T: TargetBackend + ?Sized> Drop for PristineGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(path = %self.target.work_dir().display(), "cleaning working area on early exit");
        if let Err(e) = self.target.clean_to_pristine() {
            error!(
                path = %self.target.work_dir().display(),
                error = %e,
                "failed to restore pristine working area"
            );
        }
    }
}
