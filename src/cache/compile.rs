//! The Compile Cache: maps a compile [`Fingerprint`] to the artefact(s) a previous compile of
//! that exact fingerprint produced (spec §4.7). Shared across every root in a build (spec §9 open
//! question: one `BuildTree` per root, one `CompileCache` for the whole run), since two targets
//! that happen to compile the same source+flags+module-interface combination should never pay to
//! compile it twice.

use crate::error::{read_json_file, Result};
use crate::hasher::{combine, FileHash, FlagsHash};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub const COMPILE_CACHE_FILENAME: &str = "compile-cache.json";

/// Identifies one compile unambiguously: the source's content hash, the flags used, and the
/// hashes of every module interface the compile depended on (so that a change to an upstream
/// module invalidates everything that consumed it, without needing to touch the downstream
/// file's own content hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u32);

impl Fingerprint {
    pub fn new(source_hash: FileHash, flags_hash: FlagsHash, module_iface_hashes: &[FileHash]) -> Self {
        let mut parts = vec![source_hash.0, flags_hash.0];
        parts.extend(module_iface_hashes.iter().map(|h| h.0));
        Fingerprint(combine(&parts))
    }
}

/// Where the artefact(s) produced by a cached compile live on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRecord {
    pub object_file: PathBuf,
    /// Present for Fortran compiles that also emit a `.mod` interface file.
    pub module_interface: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileCache {
    records: BTreeMap<Fingerprint, CompileRecord>,
}

pub enum Lookup {
    Hit(CompileRecord),
    Miss,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        read_json_file::<Self>(path).unwrap_or_else(|_| {
            warn!(?path, "compile cache corrupt, starting fresh");
            Self::default()
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        super::write_json_file(self, path)
    }

    /// A hit is only useful if every recorded artefact still exists on disk — the object file
    /// and, for a Fortran compile, its module interface; a cache entry surviving a `cargo
    /// clean`-equivalent wipe of the output directory must not be trusted (spec §4.7: "a reader
    /// confirms a hit by checking both `.o` and every required `.mod` artefact exist; otherwise
    /// treats the entry as absent").
    pub fn lookup(&self, fingerprint: Fingerprint) -> Lookup {
        match self.records.get(&fingerprint) {
            Some(record)
                if record.object_file.exists()
                    && record.module_interface.as_ref().map_or(true, |p| p.exists()) =>
            {
                Lookup::Hit(record.clone())
            }
            _ => Lookup::Miss,
        }
    }

    pub fn insert(&mut self, fingerprint: Fingerprint, record: CompileRecord) {
        self.records.insert(fingerprint, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_changes_with_flags() {
        let source = FileHash(1);
        let a = Fingerprint::new(source, FlagsHash(10), &[]);
        let b = Fingerprint::new(source, FlagsHash(20), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_module_interface_hash() {
        let source = FileHash(1);
        let flags = FlagsHash(10);
        let a = Fingerprint::new(source, flags, &[FileHash(100)]);
        let b = Fingerprint::new(source, flags, &[FileHash(200)]);
        assert_ne!(a, b);
    }

    #[test]
    fn missing_artefact_on_disk_is_treated_as_a_miss() {
        let mut cache = CompileCache::new();
        let fp = Fingerprint::new(FileHash(1), FlagsHash(1), &[]);
        cache.insert(
            fp,
            CompileRecord { object_file: PathBuf::from("/nonexistent/a.o"), module_interface: None },
        );
        assert!(matches!(cache.lookup(fp), Lookup::Miss));
    }

    #[test]
    fn missing_module_interface_is_treated_as_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let obj_path = dir.path().join("a.o");
        std::fs::write(&obj_path, b"fake object").unwrap();
        let missing_mod = dir.path().join("a.mod");

        let mut cache = CompileCache::new();
        let fp = Fingerprint::new(FileHash(1), FlagsHash(1), &[]);
        cache.insert(
            fp,
            CompileRecord { object_file: obj_path, module_interface: Some(missing_mod) },
        );
        assert!(matches!(cache.lookup(fp), Lookup::Miss));
    }

    #[test]
    fn hit_when_artefact_exists() {
        let dir = tempfile::tempdir().unwrap();
        let obj_path = dir.path().join("a.o");
        std::fs::write(&obj_path, b"fake object").unwrap();

        let mut cache = CompileCache::new();
        let fp = Fingerprint::new(FileHash(1), FlagsHash(1), &[]);
        cache.insert(fp, CompileRecord { object_file: obj_path, module_interface: None });
        assert!(matches!(cache.lookup(fp), Lookup::Hit(_)));
    }

    #[test]
    fn roundtrips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let obj_path = dir.path().join("a.o");
        std::fs::write(&obj_path, b"fake object").unwrap();

        let mut cache = CompileCache::new();
        let fp = Fingerprint::new(FileHash(1), FlagsHash(1), &[]);
        cache.insert(fp, CompileRecord { object_file: obj_path, module_interface: None });

        let cache_path = dir.path().join(COMPILE_CACHE_FILENAME);
        cache.write(&cache_path).unwrap();
        let reread = CompileCache::read(&cache_path);
        assert!(matches!(reread.lookup(fp), Lookup::Hit(_)));
    }
}
