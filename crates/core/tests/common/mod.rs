//! Shared fixtures for the end-to-end tests.
//!
//! The CVS side is a directory-backed stand-in: `<store>/<module>/<branch>/`
//! holds each branch's committed content. Every export re-expands
//! `$Revision$` with a fresh number, the way CVS expands keywords per
//! revision, so keyword churn can be observed. The Git side is real: a
//! bare "origin" plus the engine's own clone, driven through `GitClient`.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use git2::{Repository as GitRepo, Signature};
use tempfile::TempDir;

use cvsgitsync_core::config::HookConfig;
use cvsgitsync_core::errors::{CvsError, GitError};
use cvsgitsync_core::git::{GitClient, GitIdentity};
use cvsgitsync_core::models::Repository;
use cvsgitsync_core::reconcile;
use cvsgitsync_core::vcs::{BackendProvider, SourceBackend};
use cvsgitsync_core::SyncEngine;

// ===========================================================================
// Fake CVS
// ===========================================================================

/// A commit recorded by the fake CVS server.
#[derive(Debug, Clone)]
pub struct CvsCommit {
    pub branch: String,
    pub message: String,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FakeCvs {
    store: PathBuf,
    revision: Arc<AtomicUsize>,
    commits: Arc<Mutex<Vec<CvsCommit>>>,
}

impl FakeCvs {
    pub fn new(store: impl Into<PathBuf>) -> Self {
        Self {
            store: store.into(),
            revision: Arc::new(AtomicUsize::new(1)),
            commits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn branch_dir(&self, module: &str, branch: &str) -> PathBuf {
        self.store.join(module).join(branch)
    }

    /// Write (or with `None`, delete) files directly on a CVS branch.
    pub fn commit_files(&self, module: &str, branch: &str, files: &[(&str, Option<&str>)]) {
        let dir = self.branch_dir(module, branch);
        std::fs::create_dir_all(&dir).unwrap();
        for (path, content) in files {
            let full = dir.join(path);
            match content {
                Some(content) => {
                    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
                    std::fs::write(&full, content).unwrap();
                }
                None => std::fs::remove_file(&full).unwrap(),
            }
        }
    }

    /// Write raw bytes to one file on a CVS branch.
    pub fn commit_bytes(&self, module: &str, branch: &str, path: &str, content: &[u8]) {
        let full = self.branch_dir(module, branch).join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, content).unwrap();
    }

    /// Committed content of a CVS branch.
    pub fn branch_files(&self, module: &str, branch: &str) -> BTreeMap<String, String> {
        let dir = self.branch_dir(module, branch);
        reconcile::list_files(&dir)
            .unwrap()
            .into_iter()
            .map(|p| {
                let content = std::fs::read_to_string(dir.join(&p)).unwrap();
                (p.to_string_lossy().into_owned(), content)
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<CvsCommit> {
        self.commits.lock().unwrap().clone()
    }

    /// How many times keyword expansion has run.
    pub fn expansions(&self) -> usize {
        self.revision.load(Ordering::SeqCst) - 1
    }
}

/// One branch-pinned working area of [`FakeCvs`].
pub struct FakeCvsBranch {
    cvs: FakeCvs,
    branch: String,
    store: PathBuf,
    work: PathBuf,
    pending_added: Mutex<Vec<PathBuf>>,
    pending_removed: Mutex<Vec<PathBuf>>,
}

/// Replace every bare `$Revision$` in `content` with `expanded`.
fn expand_revision(content: &[u8], expanded: &[u8]) -> Vec<u8> {
    const BARE: &[u8] = b"$Revision$";
    let mut out = Vec::with_capacity(content.len());
    let mut rest = content;
    while let Some(at) = rest.windows(BARE.len()).position(|w| w == BARE) {
        out.extend_from_slice(&rest[..at]);
        out.extend_from_slice(expanded);
        rest = &rest[at + BARE.len()..];
    }
    out.extend_from_slice(rest);
    out
}

fn cvs_failure(command: &str, e: std::io::Error) -> CvsError {
    CvsError::CommandFailed {
        command: command.to_string(),
        exit_code: 1,
        stderr: e.to_string(),
    }
}

impl SourceBackend for FakeCvsBranch {
    fn branch(&self) -> &str {
        &self.branch
    }

    fn work_dir(&self) -> &Path {
        &self.work
    }

    fn export(&self, target_dir: &Path) -> Result<(), CvsError> {
        assert!(!target_dir.exists(), "export target must not exist");
        std::fs::create_dir_all(target_dir).map_err(|e| cvs_failure("export", e))?;
        if !self.store.exists() {
            return Ok(());
        }
        let revision = self.cvs.revision.fetch_add(1, Ordering::SeqCst);
        let expanded = format!("$Revision: 1.{} $", revision);
        for rel in reconcile::list_files(&self.store).map_err(|e| cvs_failure("export", e))? {
            let dest = target_dir.join(&rel);
            std::fs::create_dir_all(dest.parent().unwrap()).map_err(|e| cvs_failure("export", e))?;
            let bytes = std::fs::read(self.store.join(&rel)).map_err(|e| cvs_failure("export", e))?;
            let content = if reconcile::is_binary(&bytes) {
                bytes
            } else {
                expand_revision(&bytes, expanded.as_bytes())
            };
            std::fs::write(&dest, content).map_err(|e| cvs_failure("export", e))?;
        }
        Ok(())
    }

    fn checkout(&self) -> Result<(), CvsError> {
        reconcile::reset_dir(&self.work).map_err(|e| cvs_failure("checkout", e))?;
        std::fs::create_dir_all(self.work.join("CVS")).map_err(|e| cvs_failure("checkout", e))?;
        if self.store.exists() {
            reconcile::copy_tree(&self.store, &self.work).map_err(|e| cvs_failure("checkout", e))?;
        }
        Ok(())
    }

    fn list_content_files(&self) -> Result<Vec<PathBuf>, CvsError> {
        reconcile::list_files(&self.work).map_err(|e| cvs_failure("status", e))
    }

    fn add_directories(&self, dirs: &[PathBuf]) -> Result<(), CvsError> {
        for dir in dirs {
            let full = self.work.join(dir);
            assert!(full.is_dir(), "{} must exist before cvs add", dir.display());
            std::fs::create_dir_all(full.join("CVS")).map_err(|e| cvs_failure("add", e))?;
        }
        Ok(())
    }

    fn add_files(&self, paths: &[PathBuf]) -> Result<(), CvsError> {
        self.pending_added
            .lock()
            .unwrap()
            .extend(paths.iter().cloned());
        Ok(())
    }

    fn remove_files(&self, paths: &[PathBuf]) -> Result<(), CvsError> {
        for path in paths {
            std::fs::remove_file(self.work.join(path)).map_err(|e| cvs_failure("remove", e))?;
        }
        self.pending_removed
            .lock()
            .unwrap()
            .extend(paths.iter().cloned());
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<(), CvsError> {
        reconcile::reset_dir(&self.store).map_err(|e| cvs_failure("commit", e))?;
        reconcile::copy_tree(&self.work, &self.store).map_err(|e| cvs_failure("commit", e))?;
        self.cvs.commits.lock().unwrap().push(CvsCommit {
            branch: self.branch.clone(),
            message: message.to_string(),
            added: std::mem::take(&mut *self.pending_added.lock().unwrap()),
            removed: std::mem::take(&mut *self.pending_removed.lock().unwrap()),
        });
        Ok(())
    }
}

/// Fake CVS on one side, real git2 on the other.
pub struct TestBackends {
    pub cvs: FakeCvs,
    identity: GitIdentity,
}

impl BackendProvider for TestBackends {
    type Source = FakeCvsBranch;
    type Target = GitClient;

    fn source(&self, repo: &Repository, cvs_branch: &str) -> Result<FakeCvsBranch, CvsError> {
        Ok(FakeCvsBranch {
            cvs: self.cvs.clone(),
            branch: cvs_branch.to_string(),
            store: self.cvs.branch_dir(&repo.cvs_path, cvs_branch),
            work: repo.cvs_checkout_dir(cvs_branch),
            pending_added: Mutex::new(Vec::new()),
            pending_removed: Mutex::new(Vec::new()),
        })
    }

    fn target(&self, repo: &Repository) -> Result<GitClient, GitError> {
        GitClient::open_or_clone(&repo.git_ref, &repo.git_work_dir, self.identity.clone())
    }
}

// ===========================================================================
// Harness
// ===========================================================================

/// Temporary directories for one test: CVS store, bare origins, working areas.
pub struct Harness {
    pub tmp: TempDir,
    pub cvs: FakeCvs,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let cvs = FakeCvs::new(tmp.path().join("cvs-store"));
        Self { tmp, cvs }
    }

    pub fn engine(&self) -> SyncEngine<TestBackends> {
        SyncEngine::new(
            TestBackends {
                cvs: self.cvs.clone(),
                identity: GitIdentity::new("Sync Bot", "sync@example.com"),
            },
            "master",
        )
    }

    /// Path of the bare origin for `name`, created on first use.
    pub fn origin(&self, name: &str) -> PathBuf {
        let path = self.tmp.path().join("origins").join(format!("{}.git", name));
        if !path.exists() {
            GitRepo::init_bare(&path).unwrap();
        }
        path
    }

    /// A repository with no branch mapping yet.
    pub fn repository(&self, name: &str) -> Repository {
        let work = self.tmp.path().join("work");
        Repository {
            name: name.to_string(),
            cvs_root: ":local:/unused".to_string(),
            cvs_path: name.to_string(),
            git_ref: self.origin(name).to_string_lossy().into_owned(),
            skeleton: None,
            git_work_dir: work.join("git").join(name),
            cvs_checkout_root: work.join("cvs"),
            export_dir: work.join("exports").join(name),
            import_branches: BTreeMap::new(),
            export_branches: BTreeMap::new(),
            merge_branches: BTreeMap::new(),
            commit_prefixes: BTreeMap::new(),
            hooks: HookConfig::default(),
        }
    }

    pub fn skeleton(&self, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.tmp.path().join("skeleton");
        for (path, content) in files {
            let full = dir.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        dir
    }
}

pub fn import(repo: &mut Repository, cvs: &str, git: &str) {
    repo.import_branches.insert(cvs.into(), git.into());
}

pub fn export(repo: &mut Repository, git: &str, cvs: &str) {
    repo.export_branches.insert(git.into(), cvs.into());
}

pub fn merge(repo: &mut Repository, from: &str, to: &[&str]) {
    repo.merge_branches
        .insert(from.into(), to.iter().map(|s| s.to_string()).collect());
}

// ===========================================================================
// Git inspection and side commits
// ===========================================================================

/// File contents of `branch` in a (bare) repository.
pub fn git_files(repo_path: &Path, branch: &str) -> BTreeMap<String, String> {
    let repo = GitRepo::open(repo_path).unwrap();
    let commit = repo
        .find_branch(branch, git2::BranchType::Local)
        .unwrap()
        .get()
        .peel_to_commit()
        .unwrap();
    let tree = commit.tree().unwrap();

    let mut files = BTreeMap::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            let blob = repo.find_blob(entry.id()).unwrap();
            files.insert(
                format!("{}{}", dir, entry.name().unwrap()),
                String::from_utf8_lossy(blob.content()).into_owned(),
            );
        }
        git2::TreeWalkResult::Ok
    })
    .unwrap();
    files
}

/// Raw content of one file on `branch`.
pub fn git_blob(repo_path: &Path, branch: &str, path: &str) -> Vec<u8> {
    let repo = GitRepo::open(repo_path).unwrap();
    let tree = repo
        .revparse_single(&format!("refs/heads/{}", branch))
        .unwrap()
        .peel_to_commit()
        .unwrap()
        .tree()
        .unwrap();
    let entry = tree.get_path(Path::new(path)).unwrap();
    let content = repo.find_blob(entry.id()).unwrap().content().to_vec();
    content
}

pub fn branch_exists(repo_path: &Path, branch: &str) -> bool {
    let repo = GitRepo::open(repo_path).unwrap();
    let found = repo.find_branch(branch, git2::BranchType::Local).is_ok();
    found
}

pub fn branch_tip(repo_path: &Path, branch: &str) -> String {
    let repo = GitRepo::open(repo_path).unwrap();
    let id = repo.revparse_single(&format!("refs/heads/{}", branch)).unwrap().id();
    id.to_string()
}

/// Every commit reachable from `branch`, newest first.
pub fn git_log(repo_path: &Path, branch: &str) -> Vec<(String, usize)> {
    let repo = GitRepo::open(repo_path).unwrap();
    let mut walk = repo.revwalk().unwrap();
    walk.push_ref(&format!("refs/heads/{}", branch)).unwrap();
    walk.set_sorting(git2::Sort::TOPOLOGICAL).unwrap();
    walk.map(|oid| {
        let commit = repo.find_commit(oid.unwrap()).unwrap();
        (
            commit.message().unwrap_or("").to_string(),
            commit.parent_count(),
        )
    })
    .collect()
}

pub fn commit_count(repo_path: &Path, branch: &str) -> usize {
    git_log(repo_path, branch).len()
}

pub fn local_branches(repo_path: &Path) -> BTreeSet<String> {
    let repo = GitRepo::open(repo_path).unwrap();
    let names = repo
        .branches(Some(git2::BranchType::Local))
        .unwrap()
        .map(|b| b.unwrap().0.name().unwrap().unwrap().to_string())
        .collect();
    names
}

/// Commit directly to `branch` of `origin` from a scratch clone, as a
/// developer pushing to the canonical remote would. A missing branch is
/// started from `start_from` (or as a root commit when that is `None`).
pub fn push_git_commit(
    origin: &Path,
    branch: &str,
    start_from: Option<&str>,
    files: &[(&str, Option<&str>)],
    message: &str,
) -> String {
    let scratch = TempDir::new().unwrap();
    let repo = GitRepo::clone(origin.to_str().unwrap(), scratch.path()).unwrap();
    let sig = Signature::now("Dev", "dev@example.com").unwrap();

    let remote_ref = format!("refs/remotes/origin/{}", branch);
    let parent = match repo.revparse_single(&remote_ref) {
        Ok(obj) => Some(obj.peel_to_commit().unwrap()),
        Err(_) => start_from.map(|b| {
            repo.revparse_single(&format!("refs/remotes/origin/{}", b))
                .unwrap()
                .peel_to_commit()
                .unwrap()
        }),
    };

    let mut index = repo.index().unwrap();
    match &parent {
        Some(parent) => {
            repo.checkout_tree(
                parent.as_object(),
                Some(git2::build::CheckoutBuilder::new().force()),
            )
            .unwrap();
            index.read_tree(&parent.tree().unwrap()).unwrap();
        }
        None => index.clear().unwrap(),
    }

    for (path, content) in files {
        let full = scratch.path().join(path);
        match content {
            Some(content) => {
                std::fs::create_dir_all(full.parent().unwrap()).unwrap();
                std::fs::write(&full, content).unwrap();
                index.add_path(Path::new(path)).unwrap();
            }
            None => {
                let _ = std::fs::remove_file(&full);
                index.remove_path(Path::new(path)).unwrap();
            }
        }
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let local_ref = format!("refs/heads/{}", branch);
    let oid = repo
        .commit(Some(&local_ref), &sig, &sig, message, &tree, &parents)
        .unwrap();

    let mut remote = repo.find_remote("origin").unwrap();
    remote
        .push(&[format!("{}:{}", local_ref, local_ref)], None)
        .unwrap();
    oid.to_string()
}
