//! Content hashing for source files and normalised flag vectors.
//!
//! Uses Adler-32 to match the checksums legacy prebuild folders were written
//! with (the original implementation seeds `zlib.adler32` at 1 and folds it
//! line by line — see `original_source/source/fab/artifact.py`). Byte-identical
//! inputs always map to identical outputs; no path or mtime is ever mixed in.

use crate::error::{Error, Result};
use std::{
    fmt,
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

/// 32-bit content checksum of a file's bytes, independent of its name or mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct FileHash(pub u32);

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Checksum of the canonicalised (ordered) flag vector used for a per-file preprocess or compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct FlagsHash(pub u32);

impl fmt::Display for FlagsHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

const READ_CHUNK: usize = 64 * 1024;

/// Hashes a file's contents.
///
/// IO errors are returned rather than panicking: a single unreadable file is fatal for that
/// file's analysis but never for the pipeline as a whole (spec §4.1).
#[instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()))]
pub fn hash_file(path: impl AsRef<Path>) -> Result<FileHash> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let mut reader = BufReader::new(file);
    let mut hasher = adler::Adler32::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).map_err(|e| Error::io(e, path))?;
        if n == 0 {
            break;
        }
        hasher.write_slice(&buf[..n]);
    }
    Ok(FileHash(hasher.checksum()))
}

/// Hashes raw bytes directly, for callers that already hold the content in memory (e.g. the
/// analysers, which read the file once for parsing and reuse the buffer for hashing).
pub fn hash_bytes(bytes: &[u8]) -> FileHash {
    let mut hasher = adler::Adler32::new();
    hasher.write_slice(bytes);
    FileHash(hasher.checksum())
}

/// Hashes a canonicalised flag vector.
///
/// Flags are hashed in the order given; callers are expected to have already sorted/normalised
/// the vector so that semantically identical flag sets produce identical hashes regardless of
/// the order they were assembled in.
pub fn hash_flags<S: AsRef<str>>(flags: &[S]) -> FlagsHash {
    let mut hasher = adler::Adler32::new();
    for flag in flags {
        hasher.write_slice(flag.as_ref().as_bytes());
        // separator so that ["-Dab"] and ["-D", "ab"] don't collide
        hasher.write_slice(&[0u8]);
    }
    FlagsHash(hasher.checksum())
}

/// Combines several hashes into one, used by the scheduler to fold a source hash, a flags hash
/// and a set of transitive module-interface hashes into a single compile [`crate::cache::compile::Fingerprint`].
pub fn combine(hashes: &[u32]) -> u32 {
    let mut hasher = adler::Adler32::new();
    for h in hashes {
        hasher.write_slice(&h.to_le_bytes());
    }
    hasher.checksum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn same_bytes_hash_identically() {
        let mut f1 = tempfile::NamedTempFile::new().unwrap();
        f1.write_all(b"program foo\nend program foo\n").unwrap();
        let mut f2 = tempfile::NamedTempFile::new().unwrap();
        f2.write_all(b"program foo\nend program foo\n").unwrap();

        assert_eq!(hash_file(f1.path()).unwrap(), hash_file(f2.path()).unwrap());
    }

    #[test]
    fn different_bytes_hash_differently() {
        let mut f1 = tempfile::NamedTempFile::new().unwrap();
        f1.write_all(b"program foo\nend program foo\n").unwrap();
        let mut f2 = tempfile::NamedTempFile::new().unwrap();
        f2.write_all(b"program bar\nend program bar\n").unwrap();

        assert_ne!(hash_file(f1.path()).unwrap(), hash_file(f2.path()).unwrap());
    }

    #[test]
    fn missing_file_is_an_error_not_a_panic() {
        assert!(hash_file("/nonexistent/path/to/nothing.f90").is_err());
    }

    #[test]
    fn flags_hash_is_order_sensitive() {
        let a = hash_flags(&["-O2", "-DFOO"]);
        let b = hash_flags(&["-DFOO", "-O2"]);
        assert_ne!(a, b);
    }

    #[test]
    fn flags_hash_avoids_naive_concatenation_collisions() {
        let a = hash_flags(&["-Dab"]);
        let b = hash_flags(&["-D", "ab"]);
        assert_ne!(a, b);
    }
}
