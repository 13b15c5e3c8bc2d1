//! Analysed-file types shared by the Fortran and C analysers.
//!
//! An [`AnalysedFile`] is the unit the rest of the pipeline works with: the Symbol Table indexes
//! its `symbol_defs`, the Tree Extractor walks its `file_deps`, and the Analysis Cache persists it
//! keyed by content hash.

pub mod c;
pub mod fortran;

use crate::hasher::FileHash;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

/// Version tag for the analyser implementation. Bumped whenever the extraction rules change, so
/// that old [`crate::cache::analysis::AnalysisCache`] records are treated as stale rather than
/// silently misinterpreted.
pub const ANALYSER_VERSION: u32 = 1;

/// The result of analysing one preprocessed source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysedFile {
    Fortran(AnalysedFortran),
    C(AnalysedC),
    X90(AnalysedX90),
    /// The file parsed to nothing of interest (pure comments/blank/include-only).
    Empty { fpath: PathBuf },
}

impl AnalysedFile {
    pub fn fpath(&self) -> &Path {
        match self {
            AnalysedFile::Fortran(f) => &f.fpath,
            AnalysedFile::C(f) => &f.fpath,
            AnalysedFile::X90(f) => &f.fpath,
            AnalysedFile::Empty { fpath } => fpath,
        }
    }

    pub fn file_hash(&self) -> Option<FileHash> {
        match self {
            AnalysedFile::Fortran(f) => Some(f.file_hash),
            AnalysedFile::C(f) => Some(f.file_hash),
            AnalysedFile::X90(f) => Some(f.file_hash),
            AnalysedFile::Empty { .. } => None,
        }
    }

    /// All symbols this file defines.
    pub fn symbol_defs(&self) -> BTreeSet<String> {
        match self {
            AnalysedFile::Fortran(f) => f.symbol_defs.clone(),
            AnalysedFile::C(f) => f.symbol_defs.clone(),
            AnalysedFile::X90(_) | AnalysedFile::Empty { .. } => BTreeSet::new(),
        }
    }

    /// All symbols this file requires but doesn't itself define.
    pub fn symbol_deps(&self) -> BTreeSet<String> {
        match self {
            AnalysedFile::Fortran(f) => f.symbol_deps.clone(),
            AnalysedFile::C(f) => f.symbol_deps.clone(),
            AnalysedFile::X90(f) => f.kernel_deps.clone(),
            AnalysedFile::Empty { .. } => BTreeSet::new(),
        }
    }

    /// Other files this file is known to require, independent of symbol resolution (explicit
    /// `#include`/`DEPENDS ON:` links).
    pub fn file_deps(&self) -> BTreeSet<PathBuf> {
        match self {
            AnalysedFile::Fortran(f) => f.file_deps.clone(),
            AnalysedFile::C(f) => f.file_deps.clone(),
            AnalysedFile::X90(_) | AnalysedFile::Empty { .. } => BTreeSet::new(),
        }
    }

    pub fn mo_commented_file_deps(&self) -> BTreeSet<String> {
        match self {
            AnalysedFile::Fortran(f) => f.mo_commented_file_deps.clone(),
            _ => BTreeSet::new(),
        }
    }

    /// Inserts a resolved file dependency. Called by the pipeline's post-analysis linking pass
    /// once every file in a run is analysed (spec §4.5 step 2, §8 scenario 6: lowering
    /// `mo_commented_file_deps` through the full analysed set by base name).
    pub fn add_file_dep(&mut self, dep: PathBuf) {
        if let AnalysedFile::Fortran(f) = self {
            f.file_deps.insert(dep);
        }
    }
}

/// A parsed Fortran compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysedFortran {
    pub fpath: PathBuf,
    pub file_hash: FileHash,
    pub module_defs: BTreeSet<String>,
    pub symbol_defs: BTreeSet<String>,
    pub module_deps: BTreeSet<String>,
    pub symbol_deps: BTreeSet<String>,
    pub file_deps: BTreeSet<PathBuf>,
    pub mo_commented_file_deps: BTreeSet<String>,
}

impl AnalysedFortran {
    pub fn new(fpath: PathBuf, file_hash: FileHash) -> Self {
        Self {
            fpath,
            file_hash,
            module_defs: Default::default(),
            symbol_defs: Default::default(),
            module_deps: Default::default(),
            symbol_deps: Default::default(),
            file_deps: Default::default(),
            mo_commented_file_deps: Default::default(),
        }
    }

    /// `module_defs ⊆ symbol_defs` and `module_deps ⊆ symbol_deps` (spec §3 invariants).
    pub fn check_invariants(&self) -> bool {
        self.module_defs.is_subset(&self.symbol_defs) && self.module_deps.is_subset(&self.symbol_deps)
    }
}

/// A parsed, preprocessed C translation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysedC {
    pub fpath: PathBuf,
    pub file_hash: FileHash,
    pub symbol_defs: BTreeSet<String>,
    pub symbol_deps: BTreeSet<String>,
    pub file_deps: BTreeSet<PathBuf>,
}

impl AnalysedC {
    pub fn new(fpath: PathBuf, file_hash: FileHash) -> Self {
        Self {
            fpath,
            file_hash,
            symbol_defs: Default::default(),
            symbol_deps: Default::default(),
            file_deps: Default::default(),
        }
    }
}

/// A parsed PSyclone `.x90` kernel-generation input. The core only needs its kernel dependencies;
/// everything else about PSyclone is an external collaborator (spec §1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysedX90 {
    pub fpath: PathBuf,
    pub file_hash: FileHash,
    pub kernel_deps: BTreeSet<String>,
}
