//! Workspace configuration: paths, the per-file Flags resolver, and the handful of run-wide
//! options (root symbols, worker count). Grounded on `original_source/source/fab/config.py`'s
//! `ConfigSketch`/`FlagsConfig`/`AddPathFlags`, translated from runtime `string.Template`
//! substitution to values resolved once at `Config` construction — there is no Rust analogue of
//! `safe_substitute`'s deferred-template trick, so `$relative` is handled as its own substitution
//! pass in [`Flags::resolve_with_paths`] instead of being baked into a second `Template` object.

use crate::error::{Error, Result};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub const SOURCE_ROOT: &str = "source";
pub const BUILD_OUTPUT: &str = "build_output";

/// Workspace-relative paths every stage reads from or writes to.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub workspace: PathBuf,
    pub source: PathBuf,
    pub build_output: PathBuf,
    pub prebuild: PathBuf,
}

impl WorkspacePaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            source: workspace.join(SOURCE_ROOT),
            build_output: workspace.join(BUILD_OUTPUT),
            prebuild: workspace.join("_prebuild"),
            workspace,
        }
    }
}

/// One path-scoped flag override: applies `flags` to every source path matching `pattern`
/// (fnmatch-style glob, mirroring the legacy `AddPathFlags`).
#[derive(Debug, Clone)]
pub struct PathFlags {
    pattern: Option<glob::Pattern>,
    flags: Vec<String>,
}

impl PathFlags {
    /// `pattern` of `None` matches every path (the legacy `AddPathFlags` treats an empty filter
    /// the same way: `if not self.path_filter or fnmatch(...)`).
    pub fn new(pattern: Option<&str>, flags: Vec<String>) -> Result<Self> {
        let pattern = pattern
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| Error::Config(format!("invalid path flag pattern: {e}")))?;
        Ok(Self { pattern, flags })
    }

    fn matches(&self, path: &Path) -> bool {
        match &self.pattern {
            None => true,
            Some(pattern) => pattern.matches(&path.to_string_lossy()),
        }
    }
}

/// Resolves the compiler flags for a given source file: common flags plus every matching
/// path-scoped override, in registration order (spec's Flags resolver, §4.6 step 1).
#[derive(Debug, Clone, Default)]
pub struct Flags {
    common: Vec<String>,
    path_flags: Vec<PathFlags>,
}

impl Flags {
    pub fn new(common: Vec<String>, path_flags: Vec<PathFlags>) -> Self {
        Self { common, path_flags }
    }

    /// Substitutes `$source`/`$output` against `paths`, and `$relative` against `fpath`'s parent
    /// directory, then returns the resolved flag vector for `fpath` (common flags first, then
    /// every matching path override in order).
    pub fn resolve_with_paths(&self, fpath: &Path, paths: &WorkspacePaths) -> Vec<String> {
        let relative = fpath.parent().unwrap_or_else(|| Path::new(""));
        let mut resolved: Vec<String> = self
            .common
            .iter()
            .map(|f| substitute(f, paths, relative))
            .collect();

        for pf in &self.path_flags {
            if pf.matches(fpath) {
                resolved.extend(pf.flags.iter().map(|f| substitute(f, paths, relative)));
            }
        }
        resolved
    }
}

fn substitute(flag: &str, paths: &WorkspacePaths, relative: &Path) -> String {
    flag.replace("$source", &paths.source.to_string_lossy())
        .replace("$output", &paths.build_output.to_string_lossy())
        .replace("$relative", &relative.to_string_lossy())
}

/// Run-wide configuration threaded explicitly through every stage (spec §9 REDESIGN FLAGS: no
/// global mutable state for workspace paths or worker pools).
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: WorkspacePaths,
    pub flags: BTreeMap<ToolKind, Flags>,
    /// Root symbols to build; one [`crate::symbols::BuildTree`] is extracted per entry.
    pub root_symbols: Vec<String>,
    /// Additional symbols to force into every tree even if unreachable through `use`/`call`
    /// (spec §4.5 step 3).
    pub unreferenced_deps: Vec<String>,
    pub num_workers: usize,
    pub excluded_file_names: Vec<String>,
}

/// Which per-language flag set a given compile should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolKind {
    Fortran,
    C,
}

impl Config {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            paths: WorkspacePaths::new(workspace),
            flags: BTreeMap::new(),
            root_symbols: Vec::new(),
            unreferenced_deps: Vec::new(),
            num_workers: default_num_workers(),
            excluded_file_names: Vec::new(),
        }
    }

    pub fn with_root_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.root_symbols.push(symbol.into());
        self
    }

    pub fn with_flags(mut self, kind: ToolKind, flags: Flags) -> Self {
        self.flags.insert(kind, flags);
        self
    }

    pub fn flags_for(&self, kind: ToolKind) -> Flags {
        self.flags.get(&kind).cloned().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_symbols.is_empty() {
            return Err(Error::Config("at least one root symbol is required".into()));
        }
        Ok(())
    }
}

/// One less than the available parallelism, leaving a core free for the coordinating thread
/// (spec §5: worker pool default).
fn default_num_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Groups a set of paths by file extension, for reporting (spec's supplemented feature, grounded
/// on `original_source/source/fab/util.py`'s `get_fpaths_by_type`).
pub fn group_by_extension(paths: &[PathBuf]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in paths {
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default();
        groups.entry(ext).or_default().push(path.clone());
    }
    for group in groups.values_mut() {
        group.sort();
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_flags_substitute_source_and_output() {
        let paths = WorkspacePaths::new("/ws");
        let flags = Flags::new(vec!["-I$source".to_string()], vec![]);
        let resolved = flags.resolve_with_paths(Path::new("/ws/source/foo.f90"), &paths);
        assert_eq!(resolved, vec!["-I/ws/source".to_string()]);
    }

    #[test]
    fn path_scoped_flags_only_apply_to_matching_paths() {
        let paths = WorkspacePaths::new("/ws");
        let pf = PathFlags::new(Some("*fast*"), vec!["-O3".to_string()]).unwrap();
        let flags = Flags::new(vec![], vec![pf]);
        assert_eq!(
            flags.resolve_with_paths(Path::new("fast_kernel.f90"), &paths),
            vec!["-O3".to_string()]
        );
        assert!(flags.resolve_with_paths(Path::new("slow_kernel.f90"), &paths).is_empty());
    }

    #[test]
    fn relative_substitution_uses_parent_directory() {
        let paths = WorkspacePaths::new("/ws");
        let pf = PathFlags::new(None, vec!["-I$relative".to_string()]).unwrap();
        let flags = Flags::new(vec![], vec![pf]);
        let resolved = flags.resolve_with_paths(Path::new("some/dir/foo.f90"), &paths);
        assert_eq!(resolved, vec!["-Isome/dir".to_string()]);
    }

    #[test]
    fn validate_requires_a_root_symbol() {
        let config = Config::new("/ws");
        assert!(config.validate().is_err());
    }

    #[test]
    fn group_by_extension_groups_and_sorts() {
        let groups = group_by_extension(&[
            PathBuf::from("b.f90"),
            PathBuf::from("a.f90"),
            PathBuf::from("x.c"),
        ]);
        assert_eq!(groups.get("f90").unwrap(), &vec![PathBuf::from("a.f90"), PathBuf::from("b.f90")]);
        assert_eq!(groups.get("c").unwrap(), &vec![PathBuf::from("x.c")]);
    }
}
