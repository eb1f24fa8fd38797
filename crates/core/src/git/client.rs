//! Local Git repository operations via `git2`.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use git2::{
    build::CheckoutBuilder, BranchType, Commit, Cred, CredentialType, ErrorCode, FetchOptions,
    IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository, ResetType, Signature,
    StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;
use crate::vcs::{BranchListing, CommitSummary, MergeOutcome, TargetBackend};

const REMOTE: &str = "origin";

/// Name and email stamped on every commit the client creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl GitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
    identity: GitIdentity,
}

impl GitClient {
    /// Open an existing Git working area at `repo_path`.
    pub fn open<P: AsRef<Path>>(repo_path: P, identity: GitIdentity) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        debug!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            identity,
        })
    }

    /// Clone `url` into `path`. Cloning an empty remote yields an unborn HEAD.
    #[instrument(skip(identity), fields(url = %url, path = %path.display()))]
    pub fn clone_repo(url: &str, path: &Path, identity: GitIdentity) -> Result<Self, GitError> {
        info!("cloning git repository");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let attempts = Cell::new(0);
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(&attempts));
        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        let repo = builder.clone(url, path)?;
        info!("clone completed");
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            identity,
        })
    }

    /// Open the working area at `path`, cloning `url` there first if needed.
    pub fn open_or_clone(url: &str, path: &Path, identity: GitIdentity) -> Result<Self, GitError> {
        if path.join(".git").exists() {
            Self::open(path, identity)
        } else {
            Self::clone_repo(url, path, identity)
        }
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        Ok(Signature::now(&self.identity.name, &self.identity.email)?)
    }

    fn head_commit_object(&self) -> Result<Option<Commit<'_>>, GitError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Full name of the ref HEAD points at, born or not.
    fn head_ref_name(&self) -> Result<Option<String>, GitError> {
        let head = self.repo.find_reference("HEAD")?;
        Ok(head.symbolic_target().map(str::to_string))
    }

    fn remote_commit(&self, remote_ref: &str) -> Result<Option<Commit<'_>>, GitError> {
        match self.repo.find_reference(&format!("refs/remotes/{}", remote_ref)) {
            Ok(reference) => Ok(Some(reference.peel_to_commit()?)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move the current branch to `target` and update the working tree.
    fn advance_head(&self, target: &Commit<'_>, reflog: &str) -> Result<(), GitError> {
        let head_ref = self
            .head_ref_name()?
            .ok_or_else(|| GitError::RefNotFound("HEAD is detached".into()))?;
        self.repo
            .checkout_tree(target.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.reference(&head_ref, target.id(), true, reflog)?;
        self.repo.set_head(&head_ref)?;
        Ok(())
    }

    /// Delete untracked and ignored entries from the working tree.
    fn remove_untracked(&self) -> Result<usize, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(true)
            .recurse_ignored_dirs(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut removed = 0;
        for entry in statuses.iter() {
            let status = entry.status();
            if !(status.is_wt_new() || status.is_ignored()) {
                continue;
            }
            let Some(rel) = entry.path() else { continue };
            let path = self.repo_path.join(rel.trim_end_matches('/'));
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

/// Credential callbacks: SSH agent for SSH remotes, the user's credential
/// helper for HTTPS. Gives up after a few attempts instead of looping.
fn remote_callbacks(attempts: &Cell<u32>) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > 3 {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            Cred::ssh_key_from_agent(username.unwrap_or("git"))
        } else if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            let config = git2::Config::open_default()?;
            Cred::credential_helper(&config, url, username)
        } else {
            Cred::default()
        }
    });
    callbacks
}

impl TargetBackend for GitClient {
    fn work_dir(&self) -> &Path {
        &self.repo_path
    }

    fn has_commits(&self) -> Result<bool, GitError> {
        for reference in self.repo.references()? {
            if reference?.peel_to_commit().is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[instrument(skip(self), fields(path = %self.repo_path.display()))]
    fn fetch(&self) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote(REMOTE)?;
        let attempts = Cell::new(0);
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(&attempts));
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    fn branches(&self) -> Result<BranchListing, GitError> {
        let mut listing = BranchListing::default();
        for branch in self.repo.branches(None)? {
            let (branch, kind) = branch?;
            let Some(name) = branch.name()? else { continue };
            match kind {
                BranchType::Local => listing.local.push(name.to_string()),
                BranchType::Remote => {
                    if let Some(short) = name.strip_prefix("origin/") {
                        if short != "HEAD" {
                            listing.remote.push(short.to_string());
                        }
                    }
                }
            }
        }
        Ok(listing)
    }

    fn current_branch(&self) -> Result<Option<String>, GitError> {
        Ok(self
            .head_ref_name()?
            .and_then(|name| name.strip_prefix("refs/heads/").map(str::to_string)))
    }

    #[instrument(skip(self))]
    fn checkout_branch(&self, branch: &str) -> Result<(), GitError> {
        let local = match self.repo.find_branch(branch, BranchType::Local) {
            Ok(b) => b,
            Err(e) if e.code() == ErrorCode::NotFound => {
                let remote_name = format!("{}/{}", REMOTE, branch);
                let commit = self
                    .remote_commit(&remote_name)?
                    .ok_or_else(|| GitError::RefNotFound(branch.to_string()))?;
                let mut created = self.repo.branch(branch, &commit, false)?;
                created.set_upstream(Some(remote_name.as_str()))?;
                info!(branch, "created tracking branch");
                created
            }
            Err(e) => return Err(e.into()),
        };

        let commit = local.get().peel_to_commit()?;
        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head(&format!("refs/heads/{}", branch))?;
        debug!(branch, "checked out");
        Ok(())
    }

    #[instrument(skip(self))]
    fn create_orphan_branch(&self, branch: &str) -> Result<(), GitError> {
        self.repo.set_head(&format!("refs/heads/{}", branch))?;
        let mut index = self.repo.index()?;
        index.clear()?;
        index.write()?;
        info!(branch, "created orphan branch");
        Ok(())
    }

    #[instrument(skip(self))]
    fn fast_forward(&self, remote_ref: &str) -> Result<(), GitError> {
        let Some(target) = self.remote_commit(remote_ref)? else {
            debug!(remote_ref, "remote ref absent; nothing to fast-forward");
            return Ok(());
        };
        let annotated = self.repo.find_annotated_commit(target.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }
        if analysis.is_fast_forward() || analysis.is_unborn() {
            self.advance_head(&target, "cvsgitsync: fast-forward")?;
            debug!(remote_ref, sha = %target.id(), "fast-forwarded");
            return Ok(());
        }
        Err(GitError::NotFastForward {
            branch: self.current_branch()?.unwrap_or_else(|| "HEAD".into()),
            target: remote_ref.to_string(),
        })
    }

    #[instrument(skip(self, message))]
    fn merge(&self, branch: &str, message: &str) -> Result<MergeOutcome, GitError> {
        let theirs = self
            .repo
            .find_branch(branch, BranchType::Local)
            .map_err(|_| GitError::RefNotFound(branch.to_string()))?
            .get()
            .peel_to_commit()?;
        let annotated = self.repo.find_annotated_commit(theirs.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::UpToDate);
        }
        if analysis.is_fast_forward() || analysis.is_unborn() {
            self.advance_head(&theirs, "cvsgitsync: fast-forward merge")?;
            return Ok(MergeOutcome::FastForward);
        }

        let ours = self
            .head_commit_object()?
            .ok_or_else(|| GitError::RefNotFound("HEAD".into()))?;
        let mut index = self.repo.merge_commits(&ours, &theirs, None)?;

        if index.has_conflicts() {
            let mut transcript = Vec::new();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(entry) = entry {
                    let path = String::from_utf8_lossy(&entry.path).into_owned();
                    transcript.push(format!("Auto-merging {}", path));
                    transcript.push(format!("CONFLICT (content): Merge conflict in {}", path));
                }
            }
            transcript.push(
                "Automatic merge failed; fix conflicts and then commit the result.".to_string(),
            );
            warn!(branch, "merge conflict");
            return Ok(MergeOutcome::Conflict {
                transcript: format!("{}\n{}", message, transcript.join("\n")),
            });
        }

        let tree_oid = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_oid)?;
        self.repo
            .checkout_tree(tree.as_object(), Some(CheckoutBuilder::new().force()))?;
        let sig = self.signature()?;
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&ours, &theirs])?;
        info!(branch, sha = %oid, "merged");
        Ok(MergeOutcome::Merged {
            commit: oid.to_string(),
        })
    }

    fn stage_all(&self) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    }

    fn status(&self) -> Result<bool, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        debug!(entries = statuses.len(), "status");
        Ok(!statuses.is_empty())
    }

    #[instrument(skip(self, message))]
    fn commit(&self, message: &str) -> Result<String, GitError> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self.signature()?;
        let parent = self.head_commit_object()?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        info!(sha = %oid, "created commit");
        Ok(oid.to_string())
    }

    #[instrument(skip(self))]
    fn push(&self, remote: &str, local_branch: &str, remote_branch: &str) -> Result<(), GitError> {
        let mut git_remote = self.repo.find_remote(remote)?;
        let attempts = Cell::new(0);
        let rejected = RefCell::new(None::<String>);
        let mut callbacks = remote_callbacks(&attempts);
        callbacks.push_update_reference(|refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *rejected.borrow_mut() = Some(msg.to_string());
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{}:refs/heads/{}", local_branch, remote_branch);
        git_remote
            .push(&[&refspec], Some(&mut push_opts))
            .map_err(|e| GitError::PushRejected {
                branch: local_branch.to_string(),
                detail: e.message().to_string(),
            })?;

        if let Some(detail) = rejected.borrow_mut().take() {
            return Err(GitError::PushRejected {
                branch: local_branch.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }

    fn list_tracked_files(&self) -> Result<Vec<PathBuf>, GitError> {
        let index = self.repo.index()?;
        Ok(index
            .iter()
            .map(|entry| PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned()))
            .collect())
    }

    fn remove_files(&self, paths: &[PathBuf]) -> Result<(), GitError> {
        for rel in paths {
            match std::fs::remove_file(self.repo_path.join(rel)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(count = paths.len(), "removed files from working tree");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.repo_path.display()))]
    fn clean_to_pristine(&self) -> Result<(), GitError> {
        match self.head_commit_object()? {
            Some(head) => {
                self.repo.reset(head.as_object(), ResetType::Hard, None)?;
            }
            None => {
                let mut index = self.repo.index()?;
                index.clear()?;
                index.write()?;
            }
        }
        let removed = self.remove_untracked()?;
        debug!(removed, "working area pristine");
        Ok(())
    }

    fn head_commit(&self) -> Result<Option<String>, GitError> {
        Ok(self.head_commit_object()?.map(|c| c.id().to_string()))
    }

    fn update_branch(&self, branch: &str, commit: &str) -> Result<(), GitError> {
        let commit = self.repo.find_commit(Oid::from_str(commit)?)?;
        self.repo.branch(branch, &commit, true)?;
        debug!(branch, sha = %commit.id(), "updated branch");
        Ok(())
    }

    fn commit_log(
        &self,
        since_branch: &str,
        until: &str,
        limit: usize,
    ) -> Result<Vec<CommitSummary>, GitError> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;
        revwalk.push(Oid::from_str(until)?)?;

        let since = [
            format!("refs/heads/{}", since_branch),
            format!("refs/remotes/{}/{}", REMOTE, since_branch),
        ]
        .into_iter()
        .find_map(|name| self.repo.refname_to_id(&name).ok());
        if let Some(oid) = since {
            revwalk.hide(oid)?;
        }

        let mut commits = Vec::new();
        for oid in revwalk.take(limit) {
            let commit = self.repo.find_commit(oid?)?;
            let author = commit.author();
            let date = chrono::DateTime::from_timestamp(author.when().seconds(), 0)
                .map(|d| d.format("%a %b %e %H:%M:%S %Y +0000").to_string())
                .unwrap_or_default();
            commits.push(CommitSummary {
                id: commit.id().to_string(),
                author: format!(
                    "{} <{}>",
                    author.name().unwrap_or(""),
                    author.email().unwrap_or("")
                ),
                date,
                message: commit.message().unwrap_or("").to_string(),
            });
        }
        debug!(count = commits.len(), "collected commits");
        Ok(commits)
    }
}
