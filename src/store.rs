//! The Artefact Store: a typed variant replacing the dynamic attribute bags a "steps passing a
//! context object" design would otherwise reach for (spec §9 REDESIGN FLAGS). Each pipeline stage
//! declares the keys it reads and the key it writes; a stage asking for a key nobody has written
//! yet gets a precise [`Error::Message`] rather than an `Option::unwrap` panic or a silently wrong
//! default.

use crate::analysis::AnalysedFile;
use crate::error::{Error, Result};
use crate::scheduler::CompiledFile;
use crate::symbols::{BuildTree, SymbolTable};
use std::{
    collections::BTreeMap,
    path::PathBuf,
};

/// The well-known artefact keys from spec §3, as an enum rather than bare strings so a typo in a
/// stage's declared inputs/outputs is a compile error, not a silent no-op lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    AllSource,
    PragmadC,
    PreprocessedFortran,
    PreprocessedC,
    AnalysedFiles,
    SymbolTable,
    BuildTrees,
    ObjectFiles,
    ObjectArchives,
    Executables,
}

impl Key {
    fn name(self) -> &'static str {
        match self {
            Key::AllSource => "all_source",
            Key::PragmadC => "pragmad_c",
            Key::PreprocessedFortran => "preprocessed_fortran",
            Key::PreprocessedC => "preprocessed_c",
            Key::AnalysedFiles => "analysed_files",
            Key::SymbolTable => "symbol_table",
            Key::BuildTrees => "build_trees",
            Key::ObjectFiles => "object_files",
            Key::ObjectArchives => "object_archives",
            Key::Executables => "executables",
        }
    }
}

/// One well-known artefact's payload. Each stage's output is exactly one variant; reads pattern
/// match to extract the payload, turning a key/type mismatch into an `Err` instead of a panic.
#[derive(Debug, Clone)]
pub enum Artefact {
    Paths(Vec<PathBuf>),
    AnalysedFiles(Vec<AnalysedFile>),
    SymbolTable(SymbolTable),
    BuildTrees(BTreeMap<String, BuildTree>),
    CompiledFiles(Vec<CompiledFile>),
    Archives(Vec<PathBuf>),
    Executables(Vec<PathBuf>),
}

#[derive(Debug, Default)]
pub struct Store {
    values: BTreeMap<&'static str, Artefact>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Key, value: Artefact) {
        self.values.insert(key.name(), value);
    }

    fn get(&self, key: Key) -> Result<&Artefact> {
        self.values
            .get(key.name())
            .ok_or_else(|| Error::msg(format!("artefact `{}` has not been produced yet", key.name())))
    }

    pub fn paths(&self, key: Key) -> Result<&[PathBuf]> {
        match self.get(key)? {
            Artefact::Paths(p) => Ok(p),
            Artefact::Archives(p) | Artefact::Executables(p) => Ok(p),
            _ => Err(wrong_type(key)),
        }
    }

    pub fn analysed_files(&self, key: Key) -> Result<&[AnalysedFile]> {
        match self.get(key)? {
            Artefact::AnalysedFiles(f) => Ok(f),
            _ => Err(wrong_type(key)),
        }
    }

    pub fn symbol_table(&self, key: Key) -> Result<&SymbolTable> {
        match self.get(key)? {
            Artefact::SymbolTable(t) => Ok(t),
            _ => Err(wrong_type(key)),
        }
    }

    pub fn build_trees(&self, key: Key) -> Result<&BTreeMap<String, BuildTree>> {
        match self.get(key)? {
            Artefact::BuildTrees(t) => Ok(t),
            _ => Err(wrong_type(key)),
        }
    }

    pub fn compiled_files(&self, key: Key) -> Result<&[CompiledFile]> {
        match self.get(key)? {
            Artefact::CompiledFiles(f) => Ok(f),
            _ => Err(wrong_type(key)),
        }
    }

    pub fn contains(&self, key: Key) -> bool {
        self.values.contains_key(key.name())
    }
}

fn wrong_type(key: Key) -> Error {
    Error::msg(format!("artefact `{}` was produced with an unexpected payload type", key.name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_precise_error() {
        let store = Store::new();
        let err = store.paths(Key::AllSource).unwrap_err();
        assert!(err.to_string().contains("all_source"));
    }

    #[test]
    fn wrong_accessor_for_key_is_also_an_error() {
        let mut store = Store::new();
        store.put(Key::AllSource, Artefact::Paths(vec![PathBuf::from("a.f90")]));
        assert!(store.symbol_table(Key::AllSource).is_err());
    }

    #[test]
    fn round_trips_through_put_and_get() {
        let mut store = Store::new();
        store.put(Key::AllSource, Artefact::Paths(vec![PathBuf::from("a.f90")]));
        assert_eq!(store.paths(Key::AllSource).unwrap(), &[PathBuf::from("a.f90")]);
    }
}
