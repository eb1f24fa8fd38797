//! Branch topology for one repository: import pairs, export pairs and the
//! downstream merge graph.
//!
//! Resolution is a pure lookup over configuration. It rejects maps that
//! would make a run ambiguous (two sources writing the same target) or
//! non-terminating (a cycle in the merge graph).

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ConfigError;
use crate::models::{BranchPair, Direction, MergeEdge, Repository};

/// Resolved branch topology for one repository.
#[derive(Debug, Clone)]
pub struct BranchMap {
    repository: String,
    imports: Vec<BranchPair>,
    exports: Vec<BranchPair>,
    merges: BTreeMap<String, Vec<String>>,
}

impl BranchMap {
    /// Build and check the topology of `repo`.
    pub fn resolve(repo: &Repository) -> Result<Self, ConfigError> {
        let imports: Vec<BranchPair> = repo
            .import_branches
            .iter()
            .map(|(cvs, git)| BranchPair::import(cvs, git))
            .collect();
        let exports: Vec<BranchPair> = repo
            .export_branches
            .iter()
            .map(|(git, cvs)| BranchPair::export(git, cvs))
            .collect();

        check_unique_targets(&repo.name, &imports)?;
        check_unique_targets(&repo.name, &exports)?;

        let map = Self {
            repository: repo.name.clone(),
            imports,
            exports,
            merges: repo.merge_branches.clone(),
        };
        map.check_acyclic()?;
        Ok(map)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Import pairs, ordered by CVS branch.
    pub fn import_pairs(&self) -> &[BranchPair] {
        &self.imports
    }

    /// Export pairs, ordered by Git branch.
    pub fn export_pairs(&self) -> &[BranchPair] {
        &self.exports
    }

    pub fn pairs(&self, direction: Direction) -> &[BranchPair] {
        match direction {
            Direction::Import => &self.imports,
            Direction::Export => &self.exports,
        }
    }

    /// The import pair reading from `cvs_branch`.
    pub fn import_pair(&self, cvs_branch: &str) -> Result<&BranchPair, ConfigError> {
        self.imports
            .iter()
            .find(|p| p.cvs_branch == cvs_branch)
            .ok_or_else(|| self.unknown(Direction::Import, cvs_branch))
    }

    /// The export pair reading from `git_branch`.
    pub fn export_pair(&self, git_branch: &str) -> Result<&BranchPair, ConfigError> {
        self.exports
            .iter()
            .find(|p| p.git_branch == git_branch)
            .ok_or_else(|| self.unknown(Direction::Export, git_branch))
    }

    /// Git branches merged from `branch` after it updates, in configuration order.
    pub fn downstream(&self, branch: &str) -> &[String] {
        self.merges.get(branch).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every merge edge in the graph.
    pub fn edges(&self) -> impl Iterator<Item = MergeEdge> + '_ {
        self.merges
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| MergeEdge::new(from, to)))
    }

    fn unknown(&self, direction: Direction, branch: &str) -> ConfigError {
        ConfigError::UnknownBranch {
            repository: self.repository.clone(),
            direction: direction.to_string(),
            branch: branch.to_string(),
        }
    }

    fn check_acyclic(&self) -> Result<(), ConfigError> {
        let mut done = BTreeSet::new();
        for start in self.merges.keys() {
            let mut path = Vec::new();
            self.visit(start, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
    ) -> Result<(), ConfigError> {
        if let Some(pos) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<&str> = path[pos..].to_vec();
            cycle.push(node);
            return Err(ConfigError::MergeCycle {
                repository: self.repository.clone(),
                path: cycle.join(" -> "),
            });
        }
        if done.contains(node) {
            return Ok(());
        }

        path.push(node);
        for next in self.downstream(node) {
            self.visit(next, path, done)?;
        }
        path.pop();
        done.insert(node);
        Ok(())
    }
}

fn check_unique_targets(repository: &str, pairs: &[BranchPair]) -> Result<(), ConfigError> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for pair in pairs {
        if let Some(first) = seen.insert(pair.to_branch(), pair.from_branch()) {
            return Err(ConfigError::DuplicateTarget {
                repository: repository.to_string(),
                direction: pair.direction.to_string(),
                first: first.to_string(),
                second: pair.from_branch().to_string(),
                target: pair.to_branch().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookConfig;
    use std::path::PathBuf;

    fn repo() -> Repository {
        Repository {
            name: "git/module1".into(),
            cvs_root: "/cvsroot".into(),
            cvs_path: "module1".into(),
            git_ref: "/git/module1".into(),
            skeleton: None,
            git_work_dir: PathBuf::from("/w/git/git/module1"),
            cvs_checkout_root: PathBuf::from("/w/cvs"),
            export_dir: PathBuf::from("/w/exports/git/module1"),
            import_branches: BTreeMap::new(),
            export_branches: BTreeMap::new(),
            merge_branches: BTreeMap::new(),
            commit_prefixes: BTreeMap::new(),
            hooks: HookConfig::default(),
        }
    }

    fn merges(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(from, tos)| (from.to_string(), tos.iter().map(|t| t.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_resolve_pairs_and_lookup() {
        let mut r = repo();
        r.import_branches.insert("b1".into(), "cvs-b1".into());
        r.import_branches.insert("b2".into(), "cvs-b2".into());
        r.export_branches.insert("master".into(), "b2".into());

        let map = BranchMap::resolve(&r).unwrap();
        assert_eq!(map.import_pairs().len(), 2);
        assert_eq!(map.import_pair("b2").unwrap().git_branch, "cvs-b2");
        assert_eq!(map.export_pair("master").unwrap().cvs_branch, "b2");
        assert_eq!(map.pairs(Direction::Export).len(), 1);
    }

    #[test]
    fn test_unknown_branch_is_an_error() {
        let map = BranchMap::resolve(&repo()).unwrap();
        assert!(matches!(
            map.import_pair("b9"),
            Err(ConfigError::UnknownBranch { ref branch, ref direction, .. })
                if branch == "b9" && direction == "import"
        ));
        assert!(matches!(
            map.export_pair("nobranch"),
            Err(ConfigError::UnknownBranch { .. })
        ));
    }

    #[test]
    fn test_duplicate_import_target_rejected() {
        let mut r = repo();
        r.import_branches.insert("b1".into(), "shared".into());
        r.import_branches.insert("b2".into(), "shared".into());
        assert!(matches!(
            BranchMap::resolve(&r),
            Err(ConfigError::DuplicateTarget { ref target, .. }) if target == "shared"
        ));
    }

    #[test]
    fn test_downstream_and_edges() {
        let mut r = repo();
        r.merge_branches = merges(&[("a", &["b", "d"]), ("b", &["c"])]);
        let map = BranchMap::resolve(&r).unwrap();

        assert_eq!(map.downstream("a"), ["b".to_string(), "d".to_string()]);
        assert!(map.downstream("c").is_empty());
        let edges: Vec<MergeEdge> = map.edges().collect();
        assert_eq!(edges.len(), 3);
        assert!(edges.contains(&MergeEdge::new("b", "c")));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut r = repo();
        r.merge_branches = merges(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"])]);
        assert!(BranchMap::resolve(&r).is_ok());
    }

    #[test]
    fn test_merge_cycle_rejected() {
        let mut r = repo();
        r.merge_branches = merges(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        match BranchMap::resolve(&r) {
            Err(ConfigError::MergeCycle { path, .. }) => {
                assert_eq!(path, "a -> b -> c -> a");
            }
            other => panic!("expected MergeCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_merge_rejected() {
        let mut r = repo();
        r.merge_branches = merges(&[("a", &["a"])]);
        assert!(matches!(
            BranchMap::resolve(&r),
            Err(ConfigError::MergeCycle { .. })
        ));
    }
}
