//! The Analysis Cache: persisted [`AnalysedFile`] records keyed by path, invalidated by content
//! hash rather than mtime (spec §4.5). A single JSON index file, written atomically, mirroring
//! the teacher's `SolFilesCache` shape but keyed on a file hash instead of a compiler version.

use crate::analysis::{AnalysedFile, ANALYSER_VERSION};
use crate::error::{read_json_file, Result};
use crate::hasher::FileHash;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub const ANALYSIS_CACHE_FILENAME: &str = "analysis-cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnalysisRecord {
    file_hash: FileHash,
    analyser_version: u32,
    result: AnalysedFile,
}

/// The persisted analysis cache, one record per source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisCache {
    records: BTreeMap<PathBuf, AnalysisRecord>,
}

/// Whether a lookup found a reusable record or the file needs (re-)analysing.
pub enum Lookup {
    Hit(AnalysedFile),
    Miss,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the cache file at `path`. A missing file is treated as an empty cache, not an error,
    /// since the very first build of a workspace has no cache yet. A corrupt file is logged as a
    /// [`Error::CacheCorruption`] and also treated as empty (spec §4.5: "A corrupt/missing entry
    /// is treated as a miss for that file, never a fatal error").
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match read_json_file::<Self>(path) {
            Ok(cache) => cache,
            Err(_) => {
                warn!(?path, "analysis cache corrupt, starting fresh");
                Self::default()
            }
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        super::write_json_file(self, path)
    }

    /// Looks up a cached analysis for `fpath`, valid only if both the file's current content hash
    /// and the analyser version match what was recorded (spec §4.5 scenario 1 & 2, and the
    /// `ANALYSER_VERSION` bump note in [`crate::analysis`]).
    pub fn lookup(&self, fpath: &Path, current_hash: FileHash) -> Lookup {
        match self.records.get(fpath) {
            Some(record)
                if record.file_hash == current_hash && record.analyser_version == ANALYSER_VERSION =>
            {
                Lookup::Hit(record.result.clone())
            }
            _ => Lookup::Miss,
        }
    }

    pub fn insert(&mut self, fpath: PathBuf, file_hash: FileHash, result: AnalysedFile) {
        self.records.insert(fpath, AnalysisRecord { file_hash, analyser_version: ANALYSER_VERSION, result });
    }

    /// Drops any record for a path no longer present on disk, keeping the cache from growing
    /// unboundedly across renames/deletions (spec §4.5: stale entries for removed files are
    /// pruned on the next full build).
    pub fn retain_paths(&mut self, still_present: impl Fn(&Path) -> bool) {
        self.records.retain(|path, _| still_present(path));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All cached results, regardless of hit/miss status against the current tree — used to seed
    /// the Symbol Table with everything known, not just what was reanalysed this run.
    pub fn all_results(&self) -> impl Iterator<Item = &AnalysedFile> {
        self.records.values().map(|r| &r.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysedFortran;

    fn dummy(path: &str) -> AnalysedFile {
        AnalysedFile::Fortran(AnalysedFortran::new(PathBuf::from(path), FileHash(42)))
    }

    #[test]
    fn unchanged_hash_is_a_hit() {
        let mut cache = AnalysisCache::new();
        cache.insert(PathBuf::from("a.f90"), FileHash(1), dummy("a.f90"));
        assert!(matches!(cache.lookup(Path::new("a.f90"), FileHash(1)), Lookup::Hit(_)));
    }

    #[test]
    fn changed_hash_is_a_miss() {
        let mut cache = AnalysisCache::new();
        cache.insert(PathBuf::from("a.f90"), FileHash(1), dummy("a.f90"));
        assert!(matches!(cache.lookup(Path::new("a.f90"), FileHash(2)), Lookup::Miss));
    }

    #[test]
    fn unknown_path_is_a_miss() {
        let cache = AnalysisCache::new();
        assert!(matches!(cache.lookup(Path::new("nope.f90"), FileHash(1)), Lookup::Miss));
    }

    #[test]
    fn missing_cache_file_reads_as_empty() {
        let cache = AnalysisCache::read(Path::new("/nonexistent/analysis-cache.json"));
        assert!(cache.is_empty());
    }

    #[test]
    fn retain_paths_prunes_removed_files() {
        let mut cache = AnalysisCache::new();
        cache.insert(PathBuf::from("a.f90"), FileHash(1), dummy("a.f90"));
        cache.insert(PathBuf::from("b.f90"), FileHash(1), dummy("b.f90"));
        cache.retain_paths(|p| p == Path::new("a.f90"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn roundtrips_through_json() {
        let mut cache = AnalysisCache::new();
        cache.insert(PathBuf::from("a.f90"), FileHash(7), dummy("a.f90"));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ANALYSIS_CACHE_FILENAME);
        cache.write(&path).unwrap();
        let reread = AnalysisCache::read(&path);
        assert!(matches!(reread.lookup(Path::new("a.f90"), FileHash(7)), Lookup::Hit(_)));
    }
}
