//! Export cycle: one Git branch into one CVS branch.
//!
//! The Git branch's tracked files are compared with the branch-pinned CVS
//! checkout on normalized content, and the difference is applied with
//! explicit `cvs add` / `cvs remove`. The `export-<git branch>` marker
//! branch records the last exported Git commit so the next CVS commit
//! message lists only what is new; it never decides whether to export.

use tracing::{debug, info, instrument};

use super::{SyncEngine, ORIGIN};
use crate::errors::{GitError, SyncError};
use crate::hooks::HookRunner;
use crate::models::{BranchPair, BranchReport, Repository, SyncOutcome};
use crate::reconcile;
use crate::vcs::{BackendProvider, CommitSummary, SourceBackend, TargetBackend};
use crate::workspace::PristineGuard;

/// Most Git commits listed in one CVS commit message.
const MAX_LOGGED_COMMITS: usize = 100;

/// Name of the marker branch recording the last export of `git_branch`.
pub fn export_marker(git_branch: &str) -> String {
    format!("export-{}", git_branch)
}

impl<P: BackendProvider> SyncEngine<P> {
    #[instrument(skip_all, fields(git = %pair.git_branch, cvs = %pair.cvs_branch))]
    pub(crate) fn export_branch(
        &self,
        repo: &Repository,
        target: &P::Target,
        pair: &BranchPair,
    ) -> Result<BranchReport, SyncError> {
        let guard = PristineGuard::new(target);

        target.fetch()?;
        target.clean_to_pristine()?;
        let listing = target.branches()?;
        if !listing.has_local(&pair.git_branch) && !listing.has_remote(&pair.git_branch) {
            return Err(GitError::RefNotFound(pair.git_branch.clone()).into());
        }
        self.prepare_branch(target, &pair.git_branch)?;
        let head = target
            .head_commit()?
            .ok_or_else(|| GitError::RefNotFound(pair.git_branch.clone()))?;

        let source = self.provider.source(repo, &pair.cvs_branch)?;
        source.checkout()?;

        let git_root = target.work_dir();
        let cvs_root = source.work_dir();
        let git_files = target.list_tracked_files()?;
        let cvs_files = source.list_content_files()?;
        let delta = reconcile::tree_delta(git_root, &git_files, cvs_root, &cvs_files)?;

        let marker = export_marker(&pair.git_branch);
        let mut outcome = SyncOutcome::NoChange;
        if delta.is_empty() {
            info!("cvs branch already matches git");
        } else {
            debug!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                modified = delta.modified.len(),
                "applying delta to cvs checkout"
            );
            let new_dirs = delta.added_directories(cvs_root);
            reconcile::copy_files(git_root, cvs_root, &delta.added)?;
            reconcile::copy_files(git_root, cvs_root, &delta.modified)?;
            source.add_directories(&new_dirs)?;
            source.add_files(&delta.added)?;
            source.remove_files(&delta.removed)?;

            let hooks = HookRunner::new(cvs_root);
            hooks.run(
                "export_pre_commit",
                &repo.hooks.export_pre_commit,
                &pair.cvs_branch,
            )?;

            let log = target.commit_log(&marker, &head, MAX_LOGGED_COMMITS)?;
            let prefix = repo.commit_prefixes.get(&pair.cvs_branch).map(String::as_str);
            source.commit(&export_message(prefix, &pair.git_branch, &head, &log))?;

            hooks.run(
                "export_post_commit",
                &repo.hooks.export_post_commit,
                &pair.cvs_branch,
            )?;
            info!(sha = %head, "exported");
            outcome = SyncOutcome::Converged;
        }

        target.update_branch(&marker, &head)?;
        target.push(ORIGIN, &marker, &marker)?;
        guard.finish()?;

        Ok(BranchReport {
            pair: pair.clone(),
            result: Ok(outcome),
            commit: (outcome == SyncOutcome::Converged).then_some(head),
            notifications: Vec::new(),
        })
    }
}

/// Build the CVS commit message: the branch's fixed annotation, then each
/// Git commit in `git log` layout with its message indented four spaces.
pub fn export_message(
    prefix: Option<&str>,
    git_branch: &str,
    head: &str,
    log: &[CommitSummary],
) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(prefix) = prefix {
        lines.push(prefix.to_string());
    }

    if log.is_empty() {
        lines.push(format!("export from Git branch '{}' at {}", git_branch, head));
    }
    for commit in log {
        lines.push(format!("commit {}", commit.id));
        lines.push(format!("Author: {}", commit.author));
        lines.push(format!("Date:   {}", commit.date));
        lines.push(String::new());
        for line in commit.message.trim_end().lines() {
            lines.push(format!("    {}", line).trim_end().to_string());
        }
        lines.push(String::new());
    }

    let mut message = lines.join("\n");
    message.truncate(message.trim_end().len());
    message.push('\n');
    message
}
