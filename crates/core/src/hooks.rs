//! Configured shell hooks.
//!
//! Each hook entry is run as `sh -c '<entry> "$@"' cvsgitsync-hook <branch>`
//! in the working area it concerns, so a plain program path receives the
//! branch as its first argument and a shell snippet can read it as `$1`.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::errors::HookError;

/// Runs hook commands inside one working area.
#[derive(Debug, Clone)]
pub struct HookRunner {
    work_dir: PathBuf,
}

impl HookRunner {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Run every command in order; the first failure stops the rest.
    pub fn run(&self, stage: &str, commands: &[String], branch: &str) -> Result<(), HookError> {
        for command in commands {
            self.run_one(stage, command, branch)?;
        }
        Ok(())
    }

    fn run_one(&self, stage: &str, command: &str, branch: &str) -> Result<(), HookError> {
        debug!(stage, command, branch, "running hook");
        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("{} \"$@\"", command))
            .arg("cvsgitsync-hook")
            .arg(branch)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| HookError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(stage, command, exit_code, %stderr, "hook failed");
            return Err(HookError::Failed {
                command: command.to_string(),
                branch: branch.to_string(),
                exit_code,
                stderr,
            });
        }

        info!(stage, command, branch, "hook completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_receives_branch_and_runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("record.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"$1\" > hook-ran\n").unwrap();

        let runner = HookRunner::new(dir.path());
        runner
            .run("post_merge", &[format!("sh {}", script.display())], "cvs-b1")
            .unwrap();

        let recorded = std::fs::read_to_string(dir.path().join("hook-ran")).unwrap();
        assert_eq!(recorded, "cvs-b1\n");
    }

    #[test]
    fn test_snippet_reads_branch_as_dollar_one() {
        let dir = tempfile::tempdir().unwrap();
        let runner = HookRunner::new(dir.path());
        runner
            .run("import_pre_commit", &["test \"$1\" = b2 && true".into()], "b2")
            .unwrap();
    }

    #[test]
    fn test_failing_hook_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = HookRunner::new(dir.path());
        let result = runner.run(
            "import_pre_commit",
            &["echo nope >&2; false".into(), "touch never".into()],
            "b1",
        );
        match result {
            Err(HookError::Failed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, 1);
                assert!(stderr.contains("nope"));
            }
            other => panic!("expected hook failure, got {:?}", other),
        }
        assert!(!dir.path().join("never").exists());
    }

    #[test]
    fn test_no_hooks_is_ok() {
        HookRunner::new("/nonexistent").run("post_merge", &[], "b1").unwrap();
    }
}
