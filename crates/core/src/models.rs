//! Domain model types used throughout cvsgitsync.
//!
//! Repositories and branch maps are owned by configuration and read-only to
//! the engine. Outcomes and reports are recomputed on every run; nothing here
//! is persisted between runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::HookConfig;

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// A fully resolved repository entry (defaults applied, paths absolute).
#[derive(Debug, Clone)]
pub struct Repository {
    /// Logical name, e.g. `git/module1`. Also namespaces every working area.
    pub name: String,
    /// `CVSROOT` for this repository.
    pub cvs_root: String,
    /// Module path inside the CVS root.
    pub cvs_path: String,
    /// Git clone URL or path of the canonical remote.
    pub git_ref: String,
    /// Optional seed file set for new Git branches and empty histories.
    pub skeleton: Option<PathBuf>,
    /// Git working area (one per repository, branch-switched in place).
    pub git_work_dir: PathBuf,
    /// Root under which branch-pinned CVS checkouts live.
    pub cvs_checkout_root: PathBuf,
    /// Scratch area for fresh CVS exports.
    pub export_dir: PathBuf,
    /// CVS branch -> Git branch.
    pub import_branches: BTreeMap<String, String>,
    /// Git branch -> CVS branch.
    pub export_branches: BTreeMap<String, String>,
    /// Git branch -> downstream Git branches merged after it updates.
    pub merge_branches: BTreeMap<String, Vec<String>>,
    /// CVS branch -> fixed annotation placed at the top of export messages.
    pub commit_prefixes: BTreeMap<String, String>,
    pub hooks: HookConfig,
}

impl Repository {
    /// Branch-pinned CVS checkout directory for `cvs_branch`.
    pub fn cvs_checkout_dir(&self, cvs_branch: &str) -> PathBuf {
        self.cvs_checkout_root.join(cvs_branch).join(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Branch topology
// ---------------------------------------------------------------------------

/// Direction of a synchronization cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// CVS -> Git.
    Import,
    /// Git -> CVS.
    Export,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Export => write!(f, "export"),
        }
    }
}

/// A directional mapping between one CVS branch and one Git branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchPair {
    pub direction: Direction,
    pub cvs_branch: String,
    pub git_branch: String,
}

impl BranchPair {
    pub fn import(cvs_branch: impl Into<String>, git_branch: impl Into<String>) -> Self {
        Self {
            direction: Direction::Import,
            cvs_branch: cvs_branch.into(),
            git_branch: git_branch.into(),
        }
    }

    pub fn export(git_branch: impl Into<String>, cvs_branch: impl Into<String>) -> Self {
        Self {
            direction: Direction::Export,
            cvs_branch: cvs_branch.into(),
            git_branch: git_branch.into(),
        }
    }

    /// Branch the cycle reads from.
    pub fn from_branch(&self) -> &str {
        match self.direction {
            Direction::Import => &self.cvs_branch,
            Direction::Export => &self.git_branch,
        }
    }

    /// Branch the cycle writes to.
    pub fn to_branch(&self) -> &str {
        match self.direction {
            Direction::Import => &self.git_branch,
            Direction::Export => &self.cvs_branch,
        }
    }
}

impl std::fmt::Display for BranchPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from_branch(), self.to_branch())
    }
}

/// "After `from` is updated, merge it into `to`."
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeEdge {
    pub from: String,
    pub to: String,
}

impl MergeEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl std::fmt::Display for MergeEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a single branch pair cycle did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Already converged; nothing committed.
    NoChange,
    /// A commit was made on an existing branch.
    Converged,
    /// The target branch was created by this cycle.
    BootstrappedNew,
    /// Content synced, but a downstream merge conflicted.
    ConflictFailed,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChange => write!(f, "no_change"),
            Self::Converged => write!(f, "converged"),
            Self::BootstrappedNew => write!(f, "bootstrapped_new"),
            Self::ConflictFailed => write!(f, "conflict_failed"),
        }
    }
}

/// A message queued for external delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    /// Full transcript of the failed attempt.
    pub body: String,
}

impl Notification {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of one branch pair cycle.
#[derive(Debug, Clone)]
pub struct BranchReport {
    pub pair: BranchPair,
    /// `Err` carries the rendered error of a cycle that did not complete.
    pub result: Result<SyncOutcome, String>,
    /// Commit created on the written side, if any.
    pub commit: Option<String>,
    pub notifications: Vec<Notification>,
}

impl BranchReport {
    pub fn failed(pair: BranchPair, error: impl std::fmt::Display) -> Self {
        Self {
            pair,
            result: Err(error.to_string()),
            commit: None,
            notifications: Vec::new(),
        }
    }

    /// Success means content synced *and* fully propagated.
    pub fn is_success(&self) -> bool {
        matches!(self.result, Ok(outcome) if outcome != SyncOutcome::ConflictFailed)
    }
}

/// Result of all branch pairs of one repository in one direction.
#[derive(Debug, Clone)]
pub struct RepositoryReport {
    pub repository: String,
    pub direction: Direction,
    pub branches: Vec<BranchReport>,
    /// Repository-wide failure (e.g. branch map resolution), if any.
    pub error: Option<String>,
}

impl RepositoryReport {
    pub fn new(repository: impl Into<String>, direction: Direction) -> Self {
        Self {
            repository: repository.into(),
            direction,
            branches: Vec::new(),
            error: None,
        }
    }

    pub fn failed(
        repository: impl Into<String>,
        direction: Direction,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(repository, direction)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.branches.iter().all(BranchReport::is_success)
    }

    /// Human-readable summary of every failure in this repository.
    pub fn failure_detail(&self) -> String {
        let mut lines = Vec::new();
        if let Some(ref e) = self.error {
            lines.push(e.clone());
        }
        for branch in &self.branches {
            match &branch.result {
                Err(e) => lines.push(format!("{}: {}", branch.pair, e)),
                Ok(SyncOutcome::ConflictFailed) => {
                    lines.push(format!("{}: downstream merge conflict", branch.pair))
                }
                Ok(_) => {}
            }
        }
        lines.join("\n")
    }
}

/// Result of a whole batch invocation.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub repositories: Vec<RepositoryReport>,
    /// Notifications queued by the isolation controller itself.
    pub notifications: Vec<Notification>,
    /// The batch stopped early because of an `abort` disposition.
    pub aborted: bool,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.repositories.iter().filter(|r| !r.is_success()).count()
    }

    pub fn is_success(&self) -> bool {
        !self.aborted && self.failed_count() == 0
    }

    /// Every queued notification, branch-level ones first.
    pub fn all_notifications(&self) -> Vec<Notification> {
        self.repositories
            .iter()
            .flat_map(|r| r.branches.iter())
            .flat_map(|b| b.notifications.iter().cloned())
            .chain(self.notifications.iter().cloned())
            .collect()
    }

    /// Append another batch (e.g. export after import).
    pub fn merge(&mut self, other: BatchReport) {
        self.repositories.extend(other.repositories);
        self.notifications.extend(other.notifications);
        self.aborted |= other.aborted;
    }
}
