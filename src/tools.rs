//! The capability interface that stands in for the teacher's inheritance hierarchy of compilers,
//! preprocessors and linkers (spec §9 REDESIGN FLAGS): a `Tool` trait plus a category tag,
//! collected in a [`ToolBox`]. Grounded on `original_source/source/fab/tools/tool_box.py`'s
//! `ToolBox` (a `Category -> Tool` map with `add_tool`/`get_tool`) and `tools/category.py`'s
//! `Category` enum.
//!
//! Building the actual compiler command line (beyond flag substitution, which lives in
//! [`crate::config::Flags`]) and spawning the subprocess are external-collaborator concerns (spec
//! §1 non-goals): this module defines the seam a caller's own `Tool` implementation plugs into,
//! not a bundled gcc/gfortran driver.

use crate::cache::compile::{CompileRecord, Fingerprint};
use crate::error::Result;
use std::{collections::BTreeMap, fmt, path::Path};

/// Mirrors the legacy `Category` enum one-for-one; `Psyclone`/`Fcm`/`Git`/`Subversion`/`Rsync`
/// are carried even though this crate's core never calls them (spec §1: VCS/grab and PSyclone
/// wrapping are external collaborators), since a `ToolBox` built by a caller still needs to name
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    CCompiler,
    CPreprocessor,
    FortranCompiler,
    FortranPreprocessor,
    Linker,
    Archiver,
    Psyclone,
    Fcm,
    Git,
    Subversion,
    Rsync,
    Misc,
}

impl Category {
    /// Mirrors `Category.is_compiler` in the legacy enum.
    pub fn is_compiler(self) -> bool {
        matches!(self, Category::CCompiler | Category::FortranCompiler)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::CCompiler => "c-compiler",
            Category::CPreprocessor => "c-preprocessor",
            Category::FortranCompiler => "fortran-compiler",
            Category::FortranPreprocessor => "fortran-preprocessor",
            Category::Linker => "linker",
            Category::Archiver => "archiver",
            Category::Psyclone => "psyclone",
            Category::Fcm => "fcm",
            Category::Git => "git",
            Category::Subversion => "subversion",
            Category::Rsync => "rsync",
            Category::Misc => "misc",
        };
        write!(f, "{s}")
    }
}

/// A single external tool. Implementors own how `flags` becomes an actual argv and how the
/// subprocess is spawned; this crate only needs to know whether the tool is available and how to
/// ask it to produce a [`CompileRecord`] for one source file.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> Category;
    /// Cheap availability probe (e.g. `which` or a version-flag invocation). Checked once per
    /// `ToolBox` build so a missing tool fails fast rather than mid-schedule.
    fn check_available(&self) -> bool;
    /// Compiles `source` with `flags` already fully resolved (macros substituted, path overrides
    /// applied), returning where the resulting artefact(s) landed.
    fn run(&self, source: &Path, flags: &[String], fingerprint: Fingerprint) -> Result<CompileRecord>;
}

/// A `Category -> Tool` map, exactly the shape of the legacy `ToolBox`. Unlike the legacy version
/// there is no fallback `ToolRepository` default lookup: a category with no registered tool is a
/// [`crate::error::Error::ToolUnavailable`], surfaced at first use rather than guessed at.
#[derive(Default)]
pub struct ToolBox {
    tools: BTreeMap<Category, Box<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.category(), tool);
    }

    pub fn get(&self, category: Category) -> Option<&dyn Tool> {
        self.tools.get(&category).map(|b| b.as_ref())
    }

    /// Runs `check_available` on every registered tool, returning the names of any that failed.
    /// Intended to be called once by the Pipeline Driver before any stage starts (spec §4.6/§9:
    /// a missing tool should fail before scheduling work that depends on it).
    pub fn check_all(&self) -> Vec<String> {
        self.tools
            .values()
            .filter(|t| !t.check_available())
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAvailable(Category);
    impl Tool for AlwaysAvailable {
        fn name(&self) -> &str {
            "dummy"
        }
        fn category(&self) -> Category {
            self.0
        }
        fn check_available(&self) -> bool {
            true
        }
        fn run(&self, _source: &Path, _flags: &[String], _fp: Fingerprint) -> Result<CompileRecord> {
            unimplemented!()
        }
    }

    struct NeverAvailable;
    impl Tool for NeverAvailable {
        fn name(&self) -> &str {
            "broken"
        }
        fn category(&self) -> Category {
            Category::Linker
        }
        fn check_available(&self) -> bool {
            false
        }
        fn run(&self, _source: &Path, _flags: &[String], _fp: Fingerprint) -> Result<CompileRecord> {
            unimplemented!()
        }
    }

    #[test]
    fn missing_category_returns_none() {
        let tools = ToolBox::new();
        assert!(tools.get(Category::CCompiler).is_none());
    }

    #[test]
    fn registered_category_is_retrievable() {
        let mut tools = ToolBox::new();
        tools.add(Box::new(AlwaysAvailable(Category::CCompiler)));
        assert!(tools.get(Category::CCompiler).is_some());
    }

    #[test]
    fn check_all_reports_unavailable_tools() {
        let mut tools = ToolBox::new();
        tools.add(Box::new(AlwaysAvailable(Category::CCompiler)));
        tools.add(Box::new(NeverAvailable));
        let unavailable = tools.check_all();
        assert_eq!(unavailable, vec!["broken".to_string()]);
    }

    #[test]
    fn is_compiler_matches_legacy_semantics() {
        assert!(Category::CCompiler.is_compiler());
        assert!(Category::FortranCompiler.is_compiler());
        assert!(!Category::Linker.is_compiler());
    }
}
