//! Error types for the cvsgitsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//! [`SyncError`] wraps the others for a branch or repository cycle.

use thiserror::Error;

// ---------------------------------------------------------------------------
// CVS errors
// ---------------------------------------------------------------------------

/// Errors from CVS CLI operations.
#[derive(Debug, Error)]
pub enum CvsError {
    /// The `cvs` binary was not found on `$PATH`.
    #[error("cvs binary not found: {0}")]
    BinaryNotFound(String),

    /// A `cvs` command exited with a non-zero status.
    #[error("cvs {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Generic I/O wrapper.
    #[error("cvs I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// A fast-forward was requested but the histories have diverged.
    #[error("cannot fast-forward '{branch}' to '{target}': histories diverged")]
    NotFastForward { branch: String, target: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading, validation and branch map resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A referenced environment variable is not set.
    #[error("environment variable '{var}' is not set (referenced by '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// A directory-valued setting did not resolve to an absolute path.
    #[error("'{field} = {value}': value must resolve to an absolute path")]
    NotAbsolute { field: String, value: String },

    /// A branch was requested that the repository's branch map does not know.
    #[error("repository '{repository}' has no {direction} mapping for branch '{branch}'")]
    UnknownBranch {
        repository: String,
        direction: String,
        branch: String,
    },

    /// Two source branches map onto the same target branch.
    #[error(
        "repository '{repository}': {direction} branches '{first}' and '{second}' both map to '{target}'"
    )]
    DuplicateTarget {
        repository: String,
        direction: String,
        first: String,
        second: String,
        target: String,
    },

    /// The merge graph loops back on itself.
    #[error("repository '{repository}': merge graph contains a cycle: {path}")]
    MergeCycle { repository: String, path: String },

    /// No repository with the given name is configured.
    #[error("no repository named '{0}' in configuration")]
    UnknownRepository(String),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Hook errors
// ---------------------------------------------------------------------------

/// Errors from configured hook commands.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook exited with a non-zero status.
    #[error("hook '{command}' failed for branch '{branch}' (exit {exit_code}): {stderr}")]
    Failed {
        command: String,
        branch: String,
        exit_code: i32,
        stderr: String,
    },

    /// The hook could not be started.
    #[error("hook '{command}' could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Errors from the synchronization engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A CVS branch export produced no files.
    #[error("CVS branch '{branch}' for location '{location}' contains no files")]
    EmptySourceBranch { branch: String, location: String },

    /// The cycle panicked; caught at the isolation boundary.
    #[error("sync cycle panicked: {0}")]
    Panicked(String),

    /// Underlying CVS error during sync.
    #[error("sync CVS error: {0}")]
    CvsError(#[from] CvsError),

    /// Underlying Git error during sync.
    #[error("sync Git error: {0}")]
    GitError(#[from] GitError),

    /// Configuration or branch map error.
    #[error("sync configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// A hook failed.
    #[error("sync hook error: {0}")]
    HookError(#[from] HookError),

    /// Filesystem error in a scratch or working area.
    #[error("sync I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from the notification subsystem (Slack, email).
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Slack webhook delivery failed.
    #[error("Slack notification failed: {0}")]
    SlackError(String),

    /// Email delivery failed.
    #[error("email notification failed: {0}")]
    EmailError(String),

    /// HTTP error during notification delivery.
    #[error("notification HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// All notification channels failed.
    #[error("all notification channels failed: {0}")]
    AllChannelsFailed(String),
}
