//! TOML-based configuration system for cvsgitsync.
//!
//! Any string value may reference environment variables as `${NAME}`
//! (`$$` is a literal dollar sign). References are substituted before the
//! document is deserialized, so the rest of the crate only ever sees
//! resolved values. Every key ending in `_dir` must resolve to an absolute
//! path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::models::Repository;

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\$|\{([A-Za-z_][A-Za-z0-9_]*)\})").expect("invalid env reference regex")
});

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Working area roots, logging, identity.
    pub global: GlobalConfig,

    /// Import (CVS -> Git) batch settings.
    #[serde(default)]
    pub import: CycleConfig,

    /// Export (Git -> CVS) batch settings.
    #[serde(default)]
    pub export: CycleConfig,

    /// Notification settings (Slack, email).
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Fallback values for every repository entry.
    #[serde(default)]
    pub defaults: RepositoryDefaults,

    /// Repositories, in batch order.
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,
}

// ---------------------------------------------------------------------------
// Global
// ---------------------------------------------------------------------------

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Root of the per-repository Git working areas.
    pub git_dir: PathBuf,

    /// Root of the branch-pinned CVS checkouts.
    pub cvs_dir: PathBuf,

    /// Root of the CVS export scratch areas.
    pub export_dir: PathBuf,

    /// Directory for rolling log files. Stderr only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Branch created when bootstrapping an empty Git history.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Author/committer name for generated Git commits.
    #[serde(default = "default_commit_name")]
    pub commit_name: String,

    /// Author/committer email for generated Git commits.
    #[serde(default = "default_commit_email")]
    pub commit_email: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_base_branch() -> String {
    "master".into()
}
fn default_commit_name() -> String {
    "cvsgitsync".into()
}
fn default_commit_email() -> String {
    "cvsgitsync@localhost".into()
}

// ---------------------------------------------------------------------------
// Failure disposition
// ---------------------------------------------------------------------------

/// What the batch does when a repository fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorDisposition {
    /// Stop the whole batch.
    Abort,
    /// Log and move on to the next repository.
    #[default]
    Continue,
    /// Log, queue a notification, and move on.
    Notify,
}

impl std::fmt::Display for ErrorDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Continue => write!(f, "continue"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

/// Per-direction batch settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default)]
    pub on_error: ErrorDisposition,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Notification channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    /// Slack incoming-webhook URL (usually `${SLACK_WEBHOOK_URL}`).
    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    /// SMTP server address for email notifications (e.g. `smtp.example.com:587`).
    #[serde(default)]
    pub email_smtp: Option<String>,

    /// Sender email address.
    #[serde(default)]
    pub email_from: Option<String>,

    /// Recipient email addresses.
    #[serde(default)]
    pub email_recipients: Vec<String>,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Shell commands run around commits and merges. Each receives the branch
/// name as `$1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HookConfig {
    /// Before an import commit is staged; may rewrite working-tree content.
    #[serde(default)]
    pub import_pre_commit: Vec<String>,
    /// After an import commit is pushed.
    #[serde(default)]
    pub import_post_commit: Vec<String>,
    /// Before a downstream merge is attempted.
    #[serde(default)]
    pub pre_merge: Vec<String>,
    /// After a downstream merge is pushed.
    #[serde(default)]
    pub post_merge: Vec<String>,
    /// Before an export commit to CVS.
    #[serde(default)]
    pub export_pre_commit: Vec<String>,
    /// After an export commit to CVS.
    #[serde(default)]
    pub export_post_commit: Vec<String>,
}

impl HookConfig {
    /// Field-wise fallback: empty lists take `fallback`'s value.
    pub fn or(&self, fallback: &HookConfig) -> HookConfig {
        fn pick(own: &[String], other: &[String]) -> Vec<String> {
            if own.is_empty() {
                other.to_vec()
            } else {
                own.to_vec()
            }
        }
        HookConfig {
            import_pre_commit: pick(&self.import_pre_commit, &fallback.import_pre_commit),
            import_post_commit: pick(&self.import_post_commit, &fallback.import_post_commit),
            pre_merge: pick(&self.pre_merge, &fallback.pre_merge),
            post_merge: pick(&self.post_merge, &fallback.post_merge),
            export_pre_commit: pick(&self.export_pre_commit, &fallback.export_pre_commit),
            export_post_commit: pick(&self.export_post_commit, &fallback.export_post_commit),
        }
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// Values repositories inherit when they do not set them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryDefaults {
    #[serde(default)]
    pub cvs_root: Option<String>,

    /// Prefix joined with the repository name to form its Git URL.
    #[serde(default)]
    pub git_root: Option<String>,

    #[serde(default)]
    pub skeleton_dir: Option<PathBuf>,

    #[serde(default)]
    pub hooks: HookConfig,
}

/// One `[[repository]]` entry as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Logical name, e.g. `git/module1`.
    pub name: String,

    /// Module path inside the CVS root.
    pub cvs_path: String,

    #[serde(default)]
    pub cvs_root: Option<String>,

    /// Explicit Git URL; defaults to `defaults.git_root + name`.
    #[serde(default)]
    pub git_ref: Option<String>,

    #[serde(default)]
    pub skeleton_dir: Option<PathBuf>,

    /// CVS branch -> Git branch.
    #[serde(default)]
    pub import: BTreeMap<String, String>,

    /// Git branch -> CVS branch.
    #[serde(default)]
    pub export: BTreeMap<String, String>,

    /// Git branch -> downstream Git branches.
    #[serde(default)]
    pub merge: BTreeMap<String, Vec<String>>,

    /// CVS branch -> fixed annotation for export commit messages.
    #[serde(default)]
    pub commit_prefix: BTreeMap<String, String>,

    #[serde(default)]
    pub hooks: HookConfig,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load, substitute environment references, and validate a config file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration text, resolving `${NAME}` from the process environment.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_toml_str_with_env(contents, |name| std::env::var(name).ok())
    }

    /// Parse configuration text with an explicit environment lookup.
    pub fn from_toml_str_with_env<F>(contents: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut value: toml::Value =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        substitute_env(&mut value, "", &lookup)?;
        require_absolute_paths(&value, "")?;

        let config: AppConfig = value
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;

        debug!(
            repositories = config.repositories.len(),
            "configuration parsed successfully"
        );
        Ok(config)
    }

    /// Validate that required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.base_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "global.base_branch".into(),
                detail: "base branch must not be empty".into(),
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "repository.name".into(),
                    detail: "repository name must not be empty".into(),
                });
            }
            if Path::new(&repo.name).is_absolute() || repo.name.split('/').any(|c| c == "..") {
                return Err(ConfigError::InvalidValue {
                    field: format!("repository '{}'.name", repo.name),
                    detail: "name must be a relative path without '..'".into(),
                });
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("repository '{}'", repo.name),
                    detail: "repository is configured more than once".into(),
                });
            }
            if repo.cvs_root.is_none() && self.defaults.cvs_root.is_none() {
                return Err(ConfigError::InvalidValue {
                    field: format!("repository '{}'.cvs_root", repo.name),
                    detail: "no cvs_root and no defaults.cvs_root".into(),
                });
            }
            if repo.git_ref.is_none() && self.defaults.git_root.is_none() {
                return Err(ConfigError::InvalidValue {
                    field: format!("repository '{}'.git_ref", repo.name),
                    detail: "no git_ref and no defaults.git_root".into(),
                });
            }
        }

        Ok(())
    }

    /// Resolve every configured repository, applying `[defaults]`.
    pub fn repositories(&self) -> Vec<Repository> {
        self.repositories
            .iter()
            .map(|r| self.resolve_repository(r))
            .collect()
    }

    /// Resolve the named repository.
    pub fn repository(&self, name: &str) -> Result<Repository, ConfigError> {
        self.repositories
            .iter()
            .find(|r| r.name == name)
            .map(|r| self.resolve_repository(r))
            .ok_or_else(|| ConfigError::UnknownRepository(name.to_string()))
    }

    fn resolve_repository(&self, entry: &RepositoryConfig) -> Repository {
        let defaults = &self.defaults;
        let git_ref = entry.git_ref.clone().unwrap_or_else(|| {
            format!(
                "{}{}",
                defaults.git_root.as_deref().unwrap_or_default(),
                entry.name
            )
        });

        Repository {
            name: entry.name.clone(),
            cvs_root: entry
                .cvs_root
                .clone()
                .or_else(|| defaults.cvs_root.clone())
                .unwrap_or_default(),
            cvs_path: entry.cvs_path.clone(),
            git_ref,
            skeleton: entry
                .skeleton_dir
                .clone()
                .or_else(|| defaults.skeleton_dir.clone()),
            git_work_dir: self.global.git_dir.join(&entry.name),
            cvs_checkout_root: self.global.cvs_dir.clone(),
            export_dir: self.global.export_dir.join(&entry.name),
            import_branches: entry.import.clone(),
            export_branches: entry.export.clone(),
            merge_branches: entry.merge.clone(),
            commit_prefixes: entry.commit_prefix.clone(),
            hooks: entry.hooks.or(&defaults.hooks),
        }
    }
}

/// Replace `${NAME}` references in every string of the document.
fn substitute_env<F>(value: &mut toml::Value, field: &str, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        toml::Value::String(s) => {
            *s = expand_env(s, field, lookup)?;
        }
        toml::Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                substitute_env(item, &format!("{}[{}]", field, i), lookup)?;
            }
        }
        toml::Value::Table(table) => {
            for (key, item) in table.iter_mut() {
                substitute_env(item, &join_field(field, key), lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_env<F>(raw: &str, field: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut last = 0;

    for caps in ENV_REF.captures_iter(raw) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&raw[last..whole.start()]);
        match caps.get(2) {
            Some(name) => {
                let resolved = lookup(name.as_str()).ok_or_else(|| ConfigError::EnvVarMissing {
                    var: name.as_str().to_string(),
                    field: field.to_string(),
                })?;
                out.push_str(&resolved);
            }
            None => out.push('$'),
        }
        last = whole.end();
    }

    out.push_str(&raw[last..]);
    Ok(out)
}

/// Every `*_dir` key anywhere in the document must hold an absolute path.
fn require_absolute_paths(value: &toml::Value, field: &str) -> Result<(), ConfigError> {
    match value {
        toml::Value::Table(table) => {
            for (key, item) in table {
                let path = join_field(field, key);
                if key.ends_with("_dir") {
                    if let toml::Value::String(s) = item {
                        if !Path::new(s).is_absolute() {
                            return Err(ConfigError::NotAbsolute {
                                field: path,
                                value: s.clone(),
                            });
                        }
                    }
                }
                require_absolute_paths(item, &path)?;
            }
        }
        toml::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                require_absolute_paths(item, &format!("{}[{}]", field, i))?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn join_field(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}
