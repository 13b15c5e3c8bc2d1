//! Symbol Table and Build Tree Extractor.
//!
//! The Symbol Table maps every symbol defined anywhere in the source tree to the file that
//! defines it, with deterministic duplicate resolution. The Tree Extractor then walks outward
//! from a root symbol through `symbol_deps`/`file_deps`/`mo_commented_file_deps` to produce the
//! minimal [`BuildTree`] actually needed to build one target — directly grounded on the legacy
//! `extract_sub_tree` recursive descent (`original_source/source/fab/tree.py`), translated here
//! into an iterative worklist so depth doesn't blow the stack on large source trees.

use crate::analysis::AnalysedFile;
use crate::error::Warning;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

/// Maps every defined symbol to the file that defines it.
///
/// Built once per analysis run from the full set of [`AnalysedFile`]s. Duplicate definitions are
/// resolved deterministically: the file with the lexicographically earliest path wins, and the
/// loser is recorded as a [`Warning::DuplicateSymbol`] rather than silently dropped.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    definers: BTreeMap<String, PathBuf>,
    warnings: Vec<Warning>,
}

impl SymbolTable {
    pub fn build(files: &[AnalysedFile]) -> Self {
        let mut definers: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut warnings = Vec::new();

        // sorted by fpath first so duplicate resolution is deterministic regardless of the
        // order analysis results arrived from the (possibly parallel) analysis stage.
        let mut sorted_files: Vec<&AnalysedFile> = files.iter().collect();
        sorted_files.sort_by(|a, b| a.fpath().cmp(b.fpath()));

        for file in sorted_files {
            for symbol in file.symbol_defs() {
                match definers.get(&symbol) {
                    None => {
                        definers.insert(symbol, file.fpath().to_path_buf());
                    }
                    Some(existing) if existing == file.fpath() => {}
                    Some(existing) => {
                        warnings.push(Warning::DuplicateSymbol {
                            symbol,
                            kept: existing.clone(),
                            discarded: file.fpath().to_path_buf(),
                        });
                    }
                }
            }
        }

        Self { definers, warnings }
    }

    pub fn definer(&self, symbol: &str) -> Option<&Path> {
        self.definers.get(symbol).map(|p| p.as_path())
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.definers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definers.is_empty()
    }
}

/// The minimal set of files needed to build one root symbol, plus anything that couldn't be
/// resolved.
#[derive(Debug, Default, Clone)]
pub struct BuildTree {
    pub root_symbol: String,
    /// Files in the tree, keyed by path, in the order they were first reached (insertion order is
    /// preserved by `indexmap`-free `Vec` here since we only need membership + iteration, not
    /// lookup by path — a `BTreeSet` would re-sort and lose the discovery order useful for
    /// debugging).
    pub files: BTreeSet<PathBuf>,
    /// Symbols referenced somewhere in the tree with no known definer.
    pub missing: BTreeSet<String>,
}

impl BuildTree {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Extracts the [`BuildTree`] rooted at `root_symbol`.
///
/// `by_path` must contain every analysed file, keyed by its own `fpath`. Traversal order within
/// a node's dependency set is always sorted, matching the legacy extractor's `sorted(node.deps)`
/// (spec §4.4: "Traversal order ... must be deterministic").
pub fn extract_build_tree(
    root_symbol: &str,
    table: &SymbolTable,
    by_path: &BTreeMap<PathBuf, AnalysedFile>,
) -> BuildTree {
    let mut tree = BuildTree { root_symbol: root_symbol.to_string(), ..Default::default() };
    let mut visited_paths: BTreeSet<PathBuf> = BTreeSet::new();
    let mut worklist: Vec<String> = vec![root_symbol.to_string()];
    let mut seen_symbols: BTreeSet<String> = BTreeSet::new();

    while let Some(symbol) = worklist.pop() {
        if !seen_symbols.insert(symbol.clone()) {
            continue;
        }
        let Some(fpath) = table.definer(&symbol) else {
            tree.missing.insert(symbol);
            continue;
        };
        visit_file(fpath, by_path, table, &mut tree, &mut visited_paths, &mut worklist);
    }

    tree
}

fn visit_file(
    fpath: &Path,
    by_path: &BTreeMap<PathBuf, AnalysedFile>,
    table: &SymbolTable,
    tree: &mut BuildTree,
    visited_paths: &mut BTreeSet<PathBuf>,
    worklist: &mut Vec<String>,
) {
    if !visited_paths.insert(fpath.to_path_buf()) {
        return;
    }
    tree.files.insert(fpath.to_path_buf());

    let Some(file) = by_path.get(fpath) else {
        return;
    };

    // symbol deps: pull in whatever defines them, or record as missing.
    let mut deps: Vec<String> = file.symbol_deps().into_iter().collect();
    deps.sort();
    for dep in deps {
        match table.definer(&dep) {
            Some(dep_path) => {
                visit_file(dep_path, by_path, table, tree, visited_paths, worklist);
            }
            None => {
                tree.missing.insert(dep);
            }
        }
    }

    // explicit file deps: walked directly, no symbol resolution involved.
    let mut file_deps: Vec<PathBuf> = file.file_deps().into_iter().collect();
    file_deps.sort();
    for dep_path in file_deps {
        if by_path.contains_key(&dep_path) {
            visit_file(&dep_path, by_path, table, tree, visited_paths, worklist);
        }
    }

    // mo_commented_file_deps name a file by its base name rather than a resolved path; resolve
    // against every known file whose file name matches (spec §4.2/§4.4 scenario 6).
    let mut mo_deps: Vec<String> = file.mo_commented_file_deps().into_iter().collect();
    mo_deps.sort();
    for name in mo_deps {
        if let Some(resolved) = by_path.keys().find(|p| {
            p.file_name().map(|f| f.to_string_lossy() == name).unwrap_or(false)
        }) {
            visit_file(&resolved.clone(), by_path, table, tree, visited_paths, worklist);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysedFortran;
    use crate::hasher::FileHash;

    fn fortran(path: &str, defs: &[&str], deps: &[&str]) -> AnalysedFile {
        let mut f = AnalysedFortran::new(PathBuf::from(path), FileHash(0));
        for d in defs {
            f.symbol_defs.insert(d.to_string());
        }
        for d in deps {
            f.symbol_deps.insert(d.to_string());
        }
        AnalysedFile::Fortran(f)
    }

    #[test]
    fn extracts_minimal_tree_for_root() {
        let files = vec![
            fortran("root.f90", &["root"], &["root_dep"]),
            fortran("root_dep.f90", &["root_dep"], &[]),
            fortran("unrelated.f90", &["unrelated"], &[]),
        ];
        let table = SymbolTable::build(&files);
        let by_path: BTreeMap<_, _> =
            files.into_iter().map(|f| (f.fpath().to_path_buf(), f)).collect();

        let tree = extract_build_tree("root", &table, &by_path);
        assert_eq!(tree.files.len(), 2);
        assert!(tree.files.contains(Path::new("root.f90")));
        assert!(tree.files.contains(Path::new("root_dep.f90")));
        assert!(!tree.files.contains(Path::new("unrelated.f90")));
        assert!(tree.missing.is_empty());
    }

    #[test]
    fn unresolved_symbol_dep_is_recorded_as_missing() {
        let files = vec![fortran("root.f90", &["root"], &["ghost"])];
        let table = SymbolTable::build(&files);
        let by_path: BTreeMap<_, _> =
            files.into_iter().map(|f| (f.fpath().to_path_buf(), f)).collect();

        let tree = extract_build_tree("root", &table, &by_path);
        assert!(tree.missing.contains("ghost"));
    }

    #[test]
    fn unreferenced_deps_can_be_injected_after_the_fact() {
        // mirrors the legacy `test_add_unreferenced_deps` scenario: `util` depends on `util_dep`
        // but nothing in `root`'s own tree references `util` directly until a dep is injected.
        let mut root = AnalysedFortran::new(PathBuf::from("root.f90"), FileHash(0));
        root.symbol_defs.insert("root".to_string());
        root.symbol_deps.insert("root_dep".to_string());

        let mut root_dep = AnalysedFortran::new(PathBuf::from("root_dep.f90"), FileHash(0));
        root_dep.symbol_defs.insert("root_dep".to_string());
        // inject an additional unreferenced dependency, as the post-analysis linking step does.
        root_dep.symbol_deps.insert("util".to_string());

        let util = fortran("util.f90", &["util"], &["util_dep"]);
        let util_dep = fortran("util_dep.f90", &["util_dep"], &[]);

        let files = vec![AnalysedFile::Fortran(root), AnalysedFile::Fortran(root_dep), util, util_dep];
        let table = SymbolTable::build(&files);
        let by_path: BTreeMap<_, _> =
            files.into_iter().map(|f| (f.fpath().to_path_buf(), f)).collect();

        let tree = extract_build_tree("root", &table, &by_path);
        assert_eq!(tree.files.len(), 4);
        assert!(tree.files.contains(Path::new("util_dep.f90")));
    }

    #[test]
    fn duplicate_symbol_definitions_resolve_deterministically() {
        let files = vec![
            fortran("b_definer.f90", &["dup"], &[]),
            fortran("a_definer.f90", &["dup"], &[]),
        ];
        let table = SymbolTable::build(&files);
        assert_eq!(table.definer("dup"), Some(Path::new("a_definer.f90")));
        assert_eq!(table.warnings().len(), 1);
    }

    #[test]
    fn file_deps_are_walked_independent_of_symbol_resolution() {
        let mut a = AnalysedFortran::new(PathBuf::from("a.f90"), FileHash(0));
        a.symbol_defs.insert("a".to_string());
        a.file_deps.insert(PathBuf::from("b.f90"));
        let b = fortran("b.f90", &["b"], &[]);

        let files = vec![AnalysedFile::Fortran(a), b];
        let table = SymbolTable::build(&files);
        let by_path: BTreeMap<_, _> =
            files.into_iter().map(|f| (f.fpath().to_path_buf(), f)).collect();

        let tree = extract_build_tree("a", &table, &by_path);
        assert!(tree.files.contains(Path::new("b.f90")));
    }
}
