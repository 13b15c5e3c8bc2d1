//! On-disk caches keyed by content hash rather than mtime: the Analysis Cache (parsed-file
//! records) and the Compile Cache (object/module artefacts). Both follow the same read/write
//! shape as the teacher's `SolFilesCache` (single JSON index file plus a directory of payload
//! files), adapted from a version-keyed cache to a content-hash-keyed one.

pub mod analysis;
pub mod compile;

use crate::error::{Error, Result};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// Writes `bytes` to `path` atomically: write to a sibling temp file, then rename over the
/// target. Prevents a crash mid-write from leaving a half-written cache record that a later run
/// would read as corrupt (spec §4.5/§4.7: cache records must never be partially visible).
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent))?;
    }
    let tmp_path = tmp_path_for(path);
    {
        let mut f = fs::File::create(&tmp_path).map_err(|e| Error::io(e, &tmp_path))?;
        f.write_all(bytes).map_err(|e| Error::io(e, &tmp_path))?;
        f.sync_all().map_err(|e| Error::io(e, &tmp_path))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| Error::io(e, path))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{file_name}.tmp"))
}

pub(crate) fn write_json_file<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}
