//! Bidirectional CVS <-> Git synchronization engine.
//!
//! The [`SyncEngine`] drives one repository at a time through a cycle in
//! one direction:
//!
//! 1. Resolve the repository's [`BranchMap`]; a bad map fails the whole
//!    repository before any branch is touched.
//! 2. Open (or clone) the repository's Git working area.
//! 3. Run every mapped branch pair, each in its own failure domain: a
//!    failing pair is recorded and the remaining pairs still run.
//!
//! Import pairs additionally propagate their result along the merge graph.
//! Nothing is remembered between runs; every decision is rederived from the
//! working trees.

mod export;
mod import;
mod merge;

use tracing::{error, info, instrument};

use crate::branch_map::BranchMap;
use crate::errors::{GitError, SyncError};
use crate::models::{BranchPair, BranchReport, Direction, Repository, RepositoryReport};
use crate::vcs::{BackendProvider, TargetBackend};

pub use export::{export_marker, export_message};

/// Remote every working area pushes to and fetches from.
pub(crate) const ORIGIN: &str = "origin";

/// The synchronization engine, generic over how backends are built.
pub struct SyncEngine<P: BackendProvider> {
    provider: P,
    base_branch: String,
}

impl<P: BackendProvider> SyncEngine<P> {
    /// `base_branch` is created when a Git repository has no history yet.
    pub fn new(provider: P, base_branch: impl Into<String>) -> Self {
        let base_branch = base_branch.into();
        info!(base_branch = %base_branch, "initializing sync engine");
        Self {
            provider,
            base_branch,
        }
    }

    /// Run every mapped pair of `repo` in `direction`.
    ///
    /// `only` restricts the run to the named source-side branches (CVS
    /// branches for import, Git branches for export); a name the map does
    /// not know fails the repository.
    #[instrument(skip_all, fields(repository = %repo.name, %direction))]
    pub fn sync_repository(
        &self,
        repo: &Repository,
        direction: Direction,
        only: &[String],
    ) -> Result<RepositoryReport, SyncError> {
        let map = BranchMap::resolve(repo)?;
        let pairs: Vec<BranchPair> = if only.is_empty() {
            map.pairs(direction).to_vec()
        } else {
            only.iter()
                .map(|branch| match direction {
                    Direction::Import => map.import_pair(branch).cloned(),
                    Direction::Export => map.export_pair(branch).cloned(),
                })
                .collect::<Result<_, _>>()?
        };

        let mut report = RepositoryReport::new(&repo.name, direction);
        if pairs.is_empty() {
            info!("no branches mapped");
            return Ok(report);
        }

        let target = self.provider.target(repo)?;
        for pair in &pairs {
            let result = match direction {
                Direction::Import => self.import_branch(repo, &map, &target, pair),
                Direction::Export => self.export_branch(repo, &target, pair),
            };
            let branch_report = result.unwrap_or_else(|e| {
                error!(pair = %pair, error = %e, "branch cycle failed");
                BranchReport::failed(pair.clone(), e)
            });
            report.branches.push(branch_report);
        }

        info!(
            branches = report.branches.len(),
            success = report.is_success(),
            "repository cycle finished"
        );
        Ok(report)
    }

    /// Check out `branch` for writing, creating it when it exists nowhere.
    ///
    /// Returns `true` when the branch was created as a new orphan line.
    pub(crate) fn prepare_branch(
        &self,
        target: &P::Target,
        branch: &str,
    ) -> Result<bool, GitError> {
        let listing = target.branches()?;
        if listing.has_local(branch) {
            if target.current_branch()?.as_deref() != Some(branch) {
                target.checkout_branch(branch)?;
            }
            target.fast_forward(&format!("{}/{}", ORIGIN, branch))?;
            Ok(false)
        } else if listing.has_remote(branch) {
            target.checkout_branch(branch)?;
            Ok(false)
        } else {
            target.create_orphan_branch(branch)?;
            Ok(true)
        }
    }
}
