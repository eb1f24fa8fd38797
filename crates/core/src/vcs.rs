//! Backend contracts consumed by the synchronization engine.
//!
//! The engine never talks to CVS or git2 directly; it is generic over
//! these traits so that it can be driven by the real clients or by test
//! doubles. Every method blocks until the underlying operation finishes.

use std::path::{Path, PathBuf};

use crate::cvs::CvsClient;
use crate::errors::{CvsError, GitError};
use crate::git::{GitClient, GitIdentity};
use crate::models::Repository;

/// One branch-pinned CVS working area.
pub trait SourceBackend {
    /// The CVS branch (sticky tag) this working area is pinned to.
    fn branch(&self) -> &str;

    /// The branch-pinned checkout directory.
    fn work_dir(&self) -> &Path;

    /// Export the branch's current content into `target_dir`, which must
    /// not exist yet. The export carries no CVS administrative files.
    fn export(&self, target_dir: &Path) -> Result<(), CvsError>;

    /// Create the checkout if missing, else update it to the branch tip.
    fn checkout(&self) -> Result<(), CvsError>;

    /// Content files in the checkout, relative to [`work_dir`](Self::work_dir).
    fn list_content_files(&self) -> Result<Vec<PathBuf>, CvsError>;

    /// Register new directories. Parents must come before children.
    fn add_directories(&self, dirs: &[PathBuf]) -> Result<(), CvsError>;

    /// Register new files already copied into the checkout.
    fn add_files(&self, paths: &[PathBuf]) -> Result<(), CvsError>;

    /// Delete files from the checkout and schedule their removal.
    fn remove_files(&self, paths: &[PathBuf]) -> Result<(), CvsError>;

    /// Commit every pending change on the branch.
    fn commit(&self, message: &str) -> Result<(), CvsError>;
}

/// Local and remote-tracking branch names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchListing {
    pub local: Vec<String>,
    /// Names without the `origin/` prefix.
    pub remote: Vec<String>,
}

impl BranchListing {
    pub fn has_local(&self, branch: &str) -> bool {
        self.local.iter().any(|b| b == branch)
    }

    pub fn has_remote(&self, branch: &str) -> bool {
        self.remote.iter().any(|b| b == branch)
    }
}

/// Result of merging one branch into the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    UpToDate,
    FastForward,
    Merged { commit: String },
    /// The merge was abandoned and the working area restored.
    Conflict { transcript: String },
}

/// A summarized commit, as used in export commit messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// The Git working area of one repository.
pub trait TargetBackend {
    fn work_dir(&self) -> &Path;

    /// Whether any ref points at a commit.
    fn has_commits(&self) -> Result<bool, GitError>;

    /// Fetch every branch from `origin`.
    fn fetch(&self) -> Result<(), GitError>;

    fn branches(&self) -> Result<BranchListing, GitError>;

    /// Name of the checked-out branch, `None` when HEAD is detached.
    fn current_branch(&self) -> Result<Option<String>, GitError>;

    /// Check out `branch`, creating a tracking branch from `origin/<branch>`
    /// when only the remote one exists.
    fn checkout_branch(&self, branch: &str) -> Result<(), GitError>;

    /// Point HEAD at a new unborn branch and empty the index.
    fn create_orphan_branch(&self, branch: &str) -> Result<(), GitError>;

    /// Fast-forward the current branch to `remote_ref`. A missing remote
    /// ref is not an error.
    fn fast_forward(&self, remote_ref: &str) -> Result<(), GitError>;

    /// Merge `branch` into the current branch, creating a merge commit
    /// with `message` when needed.
    fn merge(&self, branch: &str, message: &str) -> Result<MergeOutcome, GitError>;

    /// Stage additions, modifications and deletions.
    fn stage_all(&self) -> Result<(), GitError>;

    /// Whether the working tree or index differs from HEAD.
    fn status(&self) -> Result<bool, GitError>;

    /// Commit the index on the current branch; returns the new commit id.
    fn commit(&self, message: &str) -> Result<String, GitError>;

    fn push(&self, remote: &str, local_branch: &str, remote_branch: &str) -> Result<(), GitError>;

    /// Paths in the index, relative to the work dir.
    fn list_tracked_files(&self) -> Result<Vec<PathBuf>, GitError>;

    /// Delete files from the working tree. The index is left alone, so the
    /// removal shows in [`status`](Self::status) and is staged by
    /// [`stage_all`](Self::stage_all).
    fn remove_files(&self, paths: &[PathBuf]) -> Result<(), GitError>;

    /// Discard every uncommitted change, untracked file and ignored file.
    fn clean_to_pristine(&self) -> Result<(), GitError>;

    fn head_commit(&self) -> Result<Option<String>, GitError>;

    /// Create or move local `branch` to `commit`.
    fn update_branch(&self, branch: &str, commit: &str) -> Result<(), GitError>;

    /// Commits reachable from `until` but not from `since_branch`, newest
    /// first. A missing `since_branch` means the whole history.
    fn commit_log(
        &self,
        since_branch: &str,
        until: &str,
        limit: usize,
    ) -> Result<Vec<CommitSummary>, GitError>;
}

/// Builds backends for a repository.
pub trait BackendProvider {
    type Source: SourceBackend;
    type Target: TargetBackend;

    /// The branch-pinned CVS working area for `cvs_branch`.
    fn source(&self, repo: &Repository, cvs_branch: &str) -> Result<Self::Source, CvsError>;

    /// The repository's Git working area, cloned on first use.
    fn target(&self, repo: &Repository) -> Result<Self::Target, GitError>;
}

/// The production provider: the `cvs` CLI and `git2`.
#[derive(Debug, Clone)]
pub struct NativeBackends {
    identity: GitIdentity,
}

impl NativeBackends {
    pub fn new(identity: GitIdentity) -> Self {
        Self { identity }
    }
}

impl BackendProvider for NativeBackends {
    type Source = CvsClient;
    type Target = GitClient;

    fn source(&self, repo: &Repository, cvs_branch: &str) -> Result<CvsClient, CvsError> {
        Ok(CvsClient::new(repo, cvs_branch))
    }

    fn target(&self, repo: &Repository) -> Result<GitClient, GitError> {
        GitClient::open_or_clone(&repo.git_ref, &repo.git_work_dir, self.identity.clone())
    }
}
