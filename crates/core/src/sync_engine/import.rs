//! Import cycle: one CVS branch into one Git branch.

use std::path::Path;

use tracing::{debug, info, instrument};

use super::merge::MergeCascade;
use super::{SyncEngine, ORIGIN};
use crate::branch_map::BranchMap;
use crate::errors::SyncError;
use crate::hooks::HookRunner;
use crate::models::{BranchPair, BranchReport, Repository, SyncOutcome};
use crate::reconcile;
use crate::vcs::{BackendProvider, SourceBackend, TargetBackend};
use crate::workspace::PristineGuard;

impl<P: BackendProvider> SyncEngine<P> {
    #[instrument(skip_all, fields(cvs = %pair.cvs_branch, git = %pair.git_branch))]
    pub(crate) fn import_branch(
        &self,
        repo: &Repository,
        map: &BranchMap,
        target: &P::Target,
        pair: &BranchPair,
    ) -> Result<BranchReport, SyncError> {
        let source = self.provider.source(repo, &pair.cvs_branch)?;
        let export_dir = repo.export_dir.as_path();

        reconcile::remove_dir(export_dir)?;
        source.export(export_dir)?;
        let exported = reconcile::list_files(export_dir)?;
        if exported.is_empty() {
            return Err(SyncError::EmptySourceBranch {
                branch: pair.cvs_branch.clone(),
                location: repo.cvs_path.clone(),
            });
        }
        reconcile::normalize_tree(export_dir, &exported)?;
        debug!(files = exported.len(), "export ready");

        let guard = PristineGuard::new(target);
        let work_dir = target.work_dir().to_path_buf();

        target.fetch()?;
        if !target.has_commits()? {
            self.bootstrap(repo, target, export_dir)?;
        }

        target.clean_to_pristine()?;
        let is_new = self.prepare_branch(target, &pair.git_branch)?;
        target.clean_to_pristine()?;

        // Deletions on the CVS side show up by omission.
        let tracked = target.list_tracked_files()?;
        target.remove_files(&tracked)?;
        reconcile::copy_tree(export_dir, &work_dir)?;
        if is_new {
            if let Some(skeleton) = &repo.skeleton {
                let seeded = reconcile::copy_tree(skeleton, &work_dir)?;
                info!(seeded, "seeded new branch from skeleton");
            }
        }

        let hooks = HookRunner::new(&work_dir);
        let changed = reconcile::detect_change(target, || {
            hooks.run(
                "import_pre_commit",
                &repo.hooks.import_pre_commit,
                &pair.git_branch,
            )
        })?;

        let mut commit = None;
        if changed {
            let message = format!(
                "import from CVS as of {}",
                chrono::Local::now().format("%a %b %e %H:%M:%S %Y")
            );
            let sha = target.commit(&message)?;
            target.push(ORIGIN, &pair.git_branch, &pair.git_branch)?;
            hooks.run(
                "import_post_commit",
                &repo.hooks.import_post_commit,
                &pair.git_branch,
            )?;
            info!(sha = %sha, "imported");
            commit = Some(sha);
        } else {
            info!("already converged");
        }

        // A conflict resolved by hand since the last run can merge now even
        // without new CVS content.
        let mut cascade = MergeCascade::new(repo, map, target, &hooks);
        let propagated = cascade.propagate(&pair.git_branch)?;
        let notifications = cascade.notifications;

        guard.finish()?;

        let outcome = match (propagated, is_new, commit.is_some()) {
            (false, _, _) => SyncOutcome::ConflictFailed,
            (true, true, true) => SyncOutcome::BootstrappedNew,
            (true, _, true) => SyncOutcome::Converged,
            (true, _, false) => SyncOutcome::NoChange,
        };
        Ok(BranchReport {
            pair: pair.clone(),
            result: Ok(outcome),
            commit,
            notifications,
        })
    }

    /// Give an empty Git repository its first commit on the base branch.
    #[instrument(skip_all, fields(base = %self.base_branch))]
    fn bootstrap(
        &self,
        repo: &Repository,
        target: &P::Target,
        export_dir: &Path,
    ) -> Result<(), SyncError> {
        info!("git history is empty; creating base branch");
        let work_dir = target.work_dir();
        target.create_orphan_branch(&self.base_branch)?;
        target.clean_to_pristine()?;

        match &repo.skeleton {
            Some(skeleton) => {
                reconcile::copy_tree(skeleton, work_dir)?;
            }
            None => {
                let ignore = match std::fs::read_to_string(export_dir.join(".cvsignore")) {
                    Ok(content) => content,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(e) => return Err(e.into()),
                };
                std::fs::write(work_dir.join(".gitignore"), ignore)?;
            }
        }

        target.stage_all()?;
        target.commit(&format!("create new empty {} branch", self.base_branch))?;
        target.push(ORIGIN, &self.base_branch, &self.base_branch)?;
        Ok(())
    }
}
