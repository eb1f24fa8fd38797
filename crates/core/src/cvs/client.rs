//! CVS working-area operations via the `cvs` CLI.
//!
//! Every command gets its working directory and `CVSROOT` passed on the
//! `Command` itself; the process environment and current directory are
//! never touched.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, instrument, warn};

use crate::errors::CvsError;
use crate::models::Repository;
use crate::reconcile;
use crate::vcs::SourceBackend;

const CVS_BINARY: &str = "cvs";

/// Client for one branch-pinned CVS checkout.
#[derive(Debug, Clone)]
pub struct CvsClient {
    root: String,
    location: String,
    branch: String,
    path: PathBuf,
}

impl CvsClient {
    /// Client for `branch` of `repo`, checked out under its branch-pinned directory.
    pub fn new(repo: &Repository, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        let client = Self {
            root: repo.cvs_root.clone(),
            location: repo.cvs_path.clone(),
            path: repo.cvs_checkout_dir(&branch),
            branch,
        };
        debug!(
            root = %client.root,
            location = %client.location,
            branch = %client.branch,
            "created CvsClient"
        );
        client
    }

    /// Run `cvs <args>` in `dir` with this client's `CVSROOT`.
    fn run_cvs(&self, dir: &Path, args: &[&str]) -> Result<String, CvsError> {
        let mut cmd = Command::new(CVS_BINARY);
        cmd.current_dir(dir)
            .env("CVSROOT", &self.root)
            .arg("-q")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = %format!("cvs {}", args.join(" ")), dir = %dir.display(), "running cvs command");
        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CvsError::BinaryNotFound(CVS_BINARY.into())
            } else {
                CvsError::IoError(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "cvs command failed");
            return Err(CvsError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                exit_code,
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Split `path`'s parent and final component, creating the parent.
    fn parent_and_name(path: &Path) -> Result<(PathBuf, String), CvsError> {
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                CvsError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("'{}' has no final component", path.display()),
                ))
            })?;
        std::fs::create_dir_all(&parent)?;
        Ok((parent, name))
    }
}

/// Whether a file should be added with `-kb`.
fn is_binary(path: &Path) -> std::io::Result<bool> {
    Ok(reconcile::is_binary(&std::fs::read(path)?))
}

fn path_args(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.to_string_lossy().into_owned()).collect()
}

impl SourceBackend for CvsClient {
    fn branch(&self) -> &str {
        &self.branch
    }

    fn work_dir(&self) -> &Path {
        &self.path
    }

    #[instrument(skip(self), fields(branch = %self.branch, location = %self.location))]
    fn export(&self, target_dir: &Path) -> Result<(), CvsError> {
        let (parent, name) = Self::parent_and_name(target_dir)?;
        self.run_cvs(&parent, &["export", "-d", &name, "-r", &self.branch, &self.location])?;
        info!(target = %target_dir.display(), "exported");
        Ok(())
    }

    #[instrument(skip(self), fields(branch = %self.branch, path = %self.path.display()))]
    fn checkout(&self) -> Result<(), CvsError> {
        if self.path.join("CVS").is_dir() {
            self.run_cvs(&self.path, &["update", "-d", "-C"])?;
            debug!("updated existing checkout");
        } else {
            let (parent, name) = Self::parent_and_name(&self.path)?;
            self.run_cvs(&parent, &["checkout", "-d", &name, "-r", &self.branch, &self.location])?;
            info!("created checkout");
        }
        Ok(())
    }

    fn list_content_files(&self) -> Result<Vec<PathBuf>, CvsError> {
        Ok(reconcile::list_files(&self.path)?)
    }

    fn add_directories(&self, dirs: &[PathBuf]) -> Result<(), CvsError> {
        for dir in dirs {
            if self.path.join(dir).join("CVS").is_dir() {
                continue;
            }
            let arg = dir.to_string_lossy();
            self.run_cvs(&self.path, &["add", &arg])?;
            debug!(dir = %arg, "added directory");
        }
        Ok(())
    }

    fn add_files(&self, paths: &[PathBuf]) -> Result<(), CvsError> {
        let mut text = Vec::new();
        let mut binary = Vec::new();
        for rel in paths {
            if is_binary(&self.path.join(rel))? {
                binary.push(rel.clone());
            } else {
                text.push(rel.clone());
            }
        }

        if !text.is_empty() {
            let args = path_args(&text);
            let mut argv = vec!["add"];
            argv.extend(args.iter().map(String::as_str));
            self.run_cvs(&self.path, &argv)?;
        }
        if !binary.is_empty() {
            let args = path_args(&binary);
            let mut argv = vec!["add", "-kb"];
            argv.extend(args.iter().map(String::as_str));
            self.run_cvs(&self.path, &argv)?;
        }
        debug!(text = text.len(), binary = binary.len(), "added files");
        Ok(())
    }

    fn remove_files(&self, paths: &[PathBuf]) -> Result<(), CvsError> {
        if paths.is_empty() {
            return Ok(());
        }
        for rel in paths {
            match std::fs::remove_file(self.path.join(rel)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        let args = path_args(paths);
        let mut argv = vec!["remove"];
        argv.extend(args.iter().map(String::as_str));
        self.run_cvs(&self.path, &argv)?;
        debug!(count = paths.len(), "removed files");
        Ok(())
    }

    #[instrument(skip(self, message), fields(branch = %self.branch))]
    fn commit(&self, message: &str) -> Result<(), CvsError> {
        let mut file = tempfile::Builder::new().suffix(".cvsgitsync").tempfile()?;
        file.write_all(message.as_bytes())?;
        file.flush()?;
        let message_path = file.path().to_string_lossy().into_owned();

        // The checkout carries the branch as a sticky tag.
        self.run_cvs(&self.path, &["commit", "-R", "-F", &message_path])?;
        info!("committed to cvs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookConfig;
    use std::collections::BTreeMap;

    fn repo(root: &Path) -> Repository {
        Repository {
            name: "git/module1".into(),
            cvs_root: "/cvsroot".into(),
            cvs_path: "module1".into(),
            git_ref: "/git/module1".into(),
            skeleton: None,
            git_work_dir: root.join("git/git/module1"),
            cvs_checkout_root: root.join("cvs"),
            export_dir: root.join("exports/git/module1"),
            import_branches: BTreeMap::new(),
            export_branches: BTreeMap::new(),
            merge_branches: BTreeMap::new(),
            commit_prefixes: BTreeMap::new(),
            hooks: HookConfig::default(),
        }
    }

    #[test]
    fn test_branch_pinned_path() {
        let client = CvsClient::new(&repo(Path::new("/w")), "b1");
        assert_eq!(client.branch(), "b1");
        assert_eq!(client.work_dir(), Path::new("/w/cvs/b1/git/module1"));
    }

    #[test]
    fn test_binary_detection() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("t.txt");
        let latin1 = dir.path().join("l.c");
        let bin = dir.path().join("b.bin");
        std::fs::write(&text, "hello\n").unwrap();
        std::fs::write(&latin1, b"/* Gr\xfc\xdfe */\n").unwrap();
        std::fs::write(&bin, [0u8, 1, 2, 3]).unwrap();
        assert!(!is_binary(&text).unwrap());
        assert!(!is_binary(&latin1).unwrap());
        assert!(is_binary(&bin).unwrap());
    }

    #[test]
    fn test_list_content_files_skips_cvs_admin() {
        let dir = tempfile::tempdir().unwrap();
        let client = CvsClient::new(&repo(dir.path()), "b1");
        let work = client.work_dir().to_path_buf();
        std::fs::create_dir_all(work.join("CVS")).unwrap();
        std::fs::write(work.join("CVS/Entries"), "").unwrap();
        std::fs::write(work.join("file"), "x").unwrap();

        assert_eq!(
            client.list_content_files().unwrap(),
            vec![PathBuf::from("file")]
        );
    }

    #[test]
    fn test_remove_nothing_runs_nothing() {
        let client = CvsClient::new(&repo(Path::new("/nonexistent")), "b1");
        client.remove_files(&[]).unwrap();
    }
}
