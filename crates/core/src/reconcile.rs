//! Content reconciliation between a CVS snapshot and a Git working tree.
//!
//! CVS re-expands RCS keywords on every checkout, so the same file comes
//! back with a different `$Revision: ... $` each time. Everything that
//! crosses from CVS into Git is normalized first, and every comparison
//! made on the export side is made on normalized content, so keyword
//! churn alone never produces a commit in either direction.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::bytes::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::{HookError, SyncError};
use crate::vcs::TargetBackend;

// Byte-oriented so Latin-1 and other legacy encodings normalize too.
static KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?-u)\$(Author|Date|Header|Id|Name|Locker|RCSfile|Revision|Source|State):[^$\n]*\$",
    )
    .expect("invalid keyword regex")
});

static LOG_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)\$Log[^\n]*\$").expect("invalid log keyword regex"));

/// Directories never treated as content on either side.
const ADMIN_DIRS: &[&str] = &[".git", "CVS"];

// ---------------------------------------------------------------------------
// Keyword normalization
// ---------------------------------------------------------------------------

/// Whether content is binary. Only a NUL byte counts; text in a legacy
/// single-byte encoding is still text.
pub fn is_binary(content: &[u8]) -> bool {
    content.contains(&0)
}

/// Collapse expanded RCS keywords to their bare form and defuse `$Log$`.
pub fn normalize_keywords(content: &[u8]) -> Cow<'_, [u8]> {
    let collapsed = KEYWORD.replace_all(content, &b"$$$1$$"[..]);
    if !LOG_KEYWORD.is_match(&collapsed) {
        return collapsed;
    }
    Cow::Owned(LOG_KEYWORD.replace_all(&collapsed, &b"OldLog:"[..]).into_owned())
}

/// Normalize one file in place. Returns `true` when the file was rewritten.
/// Binary files are left alone.
pub fn normalize_file(path: &Path) -> std::io::Result<bool> {
    let bytes = std::fs::read(path)?;
    if is_binary(&bytes) {
        return Ok(false);
    }
    match normalize_keywords(&bytes) {
        Cow::Borrowed(_) => Ok(false),
        Cow::Owned(normalized) => {
            std::fs::write(path, normalized)?;
            Ok(true)
        }
    }
}

/// Normalize every listed file under `root`. Returns how many were rewritten.
pub fn normalize_tree(root: &Path, files: &[PathBuf]) -> std::io::Result<usize> {
    let mut rewritten = 0;
    for rel in files {
        if normalize_file(&root.join(rel))? {
            rewritten += 1;
        }
    }
    debug!(root = %root.display(), rewritten, "normalized keywords");
    Ok(rewritten)
}

/// SHA-256 of a file's normalized content.
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = if is_binary(&bytes) {
        Sha256::digest(&bytes)
    } else {
        Sha256::digest(normalize_keywords(&bytes))
    };
    Ok(hex::encode(digest))
}

// ---------------------------------------------------------------------------
// Tree walking and copying
// ---------------------------------------------------------------------------

/// Every regular file under `root`, relative and sorted. `.git` and `CVS`
/// administrative directories are skipped at every depth.
pub fn list_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if root.is_dir() {
        list_files_inner(root, Path::new(""), &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn list_files_inner(dir: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let rel_path = rel.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if ADMIN_DIRS.iter().any(|d| name == *d) {
                continue;
            }
            list_files_inner(&entry.path(), &rel_path, out)?;
        } else {
            out.push(rel_path);
        }
    }
    Ok(())
}

/// Copy the whole of `src` over `dst`, creating directories as needed.
/// Administrative directories in `src` are not copied.
pub fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<usize> {
    let files = list_files(src)?;
    copy_files(src, dst, &files)?;
    Ok(files.len())
}

/// Copy the listed relative paths from `src` to `dst`.
pub fn copy_files(src: &Path, dst: &Path, files: &[PathBuf]) -> std::io::Result<()> {
    for rel in files {
        let to = dst.join(rel);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src.join(rel), &to)?;
    }
    Ok(())
}

/// Remove `dir` and everything below it; a missing `dir` is fine.
pub fn remove_dir(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove `dir` if present and recreate it empty.
pub fn reset_dir(dir: &Path) -> std::io::Result<()> {
    remove_dir(dir)?;
    std::fs::create_dir_all(dir)
}

// ---------------------------------------------------------------------------
// Export-side delta
// ---------------------------------------------------------------------------

/// File-level difference that turns `to` into a copy of `from`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDelta {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
}

impl TreeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Parent directories of added files that do not yet exist under
    /// `to_root`, parents before children.
    pub fn added_directories(&self, to_root: &Path) -> Vec<PathBuf> {
        let mut dirs = BTreeSet::new();
        for file in &self.added {
            for ancestor in file.ancestors().skip(1) {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                if !to_root.join(ancestor).is_dir() {
                    dirs.insert(ancestor.to_path_buf());
                }
            }
        }
        dirs.into_iter().collect()
    }
}

/// Compare two file sets. Files present on both sides are modified when
/// their normalized contents differ.
pub fn tree_delta(
    from_root: &Path,
    from_files: &[PathBuf],
    to_root: &Path,
    to_files: &[PathBuf],
) -> std::io::Result<TreeDelta> {
    let from: BTreeSet<&PathBuf> = from_files.iter().collect();
    let to: BTreeSet<&PathBuf> = to_files.iter().collect();

    let added = from.difference(&to).map(|p| (*p).clone()).collect();
    let removed = to.difference(&from).map(|p| (*p).clone()).collect();

    let mut modified = Vec::new();
    for rel in from.intersection(&to) {
        if content_hash(&from_root.join(rel))? != content_hash(&to_root.join(rel))? {
            modified.push((*rel).clone());
        }
    }

    Ok(TreeDelta {
        added,
        removed,
        modified,
    })
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

/// Decide whether the Git working tree holds a real change.
///
/// Status is queried once after the CVS content is copied in. Only when
/// that reports a change is the pre-commit hook run and everything staged;
/// status is then queried again, since staging (line-ending
/// canonicalization) or the hook may have reduced the change to nothing.
pub fn detect_change<T, F>(target: &T, pre_commit: F) -> Result<bool, SyncError>
where
    T: TargetBackend + ?Sized,
    F: FnOnce() -> Result<(), HookError>,
{
    if !target.status()? {
        debug!("working tree already matches HEAD");
        return Ok(false);
    }

    pre_commit()?;
    target.stage_all()?;

    let changed = target.status()?;
    if !changed {
        info!("change was cosmetic after staging; nothing to commit");
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_keywords() {
        let text = b"/* $Id: foo.c,v 1.4 2012/01/01 12:00:00 jdoe Exp $ */\n\
                     rev = \"$Revision: 1.4 $\";\n";
        let normalized = normalize_keywords(text);
        assert_eq!(&*normalized, b"/* $Id$ */\nrev = \"$Revision$\";\n");
    }

    #[test]
    fn test_normalize_is_stable_across_revisions() {
        let a = normalize_keywords(b"v $Revision: 1.1 $ by $Author: alice $\n").into_owned();
        let b = normalize_keywords(b"v $Revision: 1.7 $ by $Author: bob $\n").into_owned();
        assert_eq!(a, b);
        assert_eq!(a, b"v $Revision$ by $Author$\n");
    }

    #[test]
    fn test_normalize_leaves_plain_text_borrowed() {
        let text = b"no keywords, just $5 and $PATH\n";
        assert!(matches!(normalize_keywords(text), Cow::Borrowed(_)));
    }

    #[test]
    fn test_normalize_defuses_log() {
        let text = b"# $Log: foo.sh,v $\n# Revision 1.2\n";
        assert_eq!(&*normalize_keywords(text), b"# OldLog:\n# Revision 1.2\n");
    }

    #[test]
    fn test_normalize_file_handles_latin1_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("menu.c");
        std::fs::write(&path, b"/* caf\xe9 */\n/* $Revision: 1.7 $ by $Author: jos\xe9 $ */\n")
            .unwrap();

        assert!(normalize_file(&path).unwrap());
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"/* caf\xe9 */\n/* $Revision$ by $Author$ */\n"
        );
    }

    #[test]
    fn test_latin1_keyword_churn_hashes_equal() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        std::fs::write(&old, b"d\xe9j\xe0 $Revision: 1.1 $\n").unwrap();
        std::fs::write(&new, b"d\xe9j\xe0 $Revision: 1.2 $\n").unwrap();

        assert_eq!(content_hash(&old).unwrap(), content_hash(&new).unwrap());
    }

    #[test]
    fn test_normalize_file_skips_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let bytes = [0x00, 0xfe, b'$', b'I', b'd', b':', b' ', b'x', b' ', b'$'];
        std::fs::write(&path, bytes).unwrap();

        assert!(!normalize_file(&path).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_is_binary_only_on_nul() {
        assert!(is_binary(b"GIF89a\x00\x01"));
        assert!(!is_binary(b"na\xefve\n"));
        assert!(!is_binary(b"plain\n"));
    }

    #[test]
    fn test_list_files_skips_admin_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("CVS")).unwrap();
        std::fs::create_dir_all(root.join("sub/CVS")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("CVS/Entries"), "x").unwrap();
        std::fs::write(root.join("sub/CVS/Entries"), "x").unwrap();
        std::fs::write(root.join(".git/HEAD"), "x").unwrap();
        std::fs::write(root.join("a"), "a").unwrap();
        std::fs::write(root.join(".cvsignore"), "*.o").unwrap();
        std::fs::write(root.join("sub/b"), "b").unwrap();

        let files = list_files(root).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from(".cvsignore"),
                PathBuf::from("a"),
                PathBuf::from("sub/b")
            ]
        );
    }

    #[test]
    fn test_copy_tree_creates_directories() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("x/y")).unwrap();
        std::fs::write(src.path().join("x/y/z"), "deep").unwrap();
        std::fs::write(src.path().join("top"), "top").unwrap();

        assert_eq!(copy_tree(src.path(), dst.path()).unwrap(), 2);
        assert_eq!(
            std::fs::read_to_string(dst.path().join("x/y/z")).unwrap(),
            "deep"
        );
    }

    #[test]
    fn test_reset_dir_clears_stale_content() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("stale"), "old").unwrap();

        reset_dir(&scratch).unwrap();
        assert!(scratch.is_dir());
        assert!(list_files(&scratch).unwrap().is_empty());
    }

    #[test]
    fn test_tree_delta_ignores_keyword_churn() {
        let git = tempfile::tempdir().unwrap();
        let cvs = tempfile::tempdir().unwrap();

        std::fs::write(git.path().join("same"), "rev $Revision$\n").unwrap();
        std::fs::write(cvs.path().join("same"), "rev $Revision: 1.9 $\n").unwrap();
        std::fs::write(git.path().join("changed"), "new\n").unwrap();
        std::fs::write(cvs.path().join("changed"), "old\n").unwrap();
        std::fs::create_dir_all(git.path().join("d/e")).unwrap();
        std::fs::write(git.path().join("d/e/added"), "a\n").unwrap();
        std::fs::write(cvs.path().join("gone"), "g\n").unwrap();

        let git_files = list_files(git.path()).unwrap();
        let cvs_files = list_files(cvs.path()).unwrap();
        let delta = tree_delta(git.path(), &git_files, cvs.path(), &cvs_files).unwrap();

        assert_eq!(delta.added, vec![PathBuf::from("d/e/added")]);
        assert_eq!(delta.removed, vec![PathBuf::from("gone")]);
        assert_eq!(delta.modified, vec![PathBuf::from("changed")]);
        assert_eq!(
            delta.added_directories(cvs.path()),
            vec![PathBuf::from("d"), PathBuf::from("d/e")]
        );
    }

    #[test]
    fn test_empty_delta() {
        assert!(TreeDelta::default().is_empty());
    }
}
