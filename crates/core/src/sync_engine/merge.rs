//! Downstream merge propagation along the merge graph.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::ORIGIN;
use crate::branch_map::BranchMap;
use crate::errors::SyncError;
use crate::hooks::HookRunner;
use crate::models::{MergeEdge, Notification, Repository};
use crate::vcs::{MergeOutcome, TargetBackend};

/// One propagation pass starting from a freshly updated branch.
pub(crate) struct MergeCascade<'a, T: TargetBackend + ?Sized> {
    repo: &'a Repository,
    map: &'a BranchMap,
    target: &'a T,
    hooks: &'a HookRunner,
    visited: BTreeSet<MergeEdge>,
    /// Transcripts of conflicting merges, for external delivery.
    pub notifications: Vec<Notification>,
}

impl<'a, T: TargetBackend + ?Sized> MergeCascade<'a, T> {
    pub(crate) fn new(
        repo: &'a Repository,
        map: &'a BranchMap,
        target: &'a T,
        hooks: &'a HookRunner,
    ) -> Self {
        Self {
            repo,
            map,
            target,
            hooks,
            visited: BTreeSet::new(),
            notifications: Vec::new(),
        }
    }

    /// Merge `from` into each of its downstream branches, depth first.
    ///
    /// A conflicting edge is not pushed; its transcript is queued and its
    /// subtree is skipped, but sibling edges still run. Returns `true` only
    /// when every visited edge merged. Command failures other than a
    /// conflict abort the traversal.
    pub(crate) fn propagate(&mut self, from: &str) -> Result<bool, SyncError> {
        let mut success = true;
        self.target.clean_to_pristine()?;

        for to in self.map.downstream(from) {
            let edge = MergeEdge::new(from, to);
            if !self.visited.insert(edge.clone()) {
                warn!(edge = %edge, "merge edge already visited; skipping");
                continue;
            }

            self.target.checkout_branch(to)?;
            self.target.fast_forward(&format!("{}/{}", ORIGIN, to))?;
            self.hooks.run("pre_merge", &self.repo.hooks.pre_merge, to)?;

            let message = format!("Automated merge '{}' into '{}'", from, to);
            match self.target.merge(from, &message)? {
                MergeOutcome::Conflict { transcript } => {
                    warn!(edge = %edge, "merge conflict; not pushed");
                    self.notifications.push(Notification::new(message, transcript));
                    success = false;
                }
                outcome => {
                    info!(edge = %edge, ?outcome, "merged");
                    self.target.push(ORIGIN, to, to)?;
                    self.hooks.run("post_merge", &self.repo.hooks.post_merge, to)?;
                    if !self.propagate(to)? {
                        success = false;
                    }
                }
            }
        }

        Ok(success)
    }
}
