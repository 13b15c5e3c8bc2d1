//! The Build Scheduler: topologically layers a [`BuildTree`] and drives compiles level by level,
//! enforcing the at-most-one-concurrent-compile-per-fingerprint invariant across every root being
//! built in the same run (spec §4.6, §9).
//!
//! Each level is compiled with a bounded `rayon` thread pool, mirroring the teacher's
//! `compile_parallel` (`examples/foundry-rs-compilers/src/compile/project.rs`): build the pool
//! once, `par_iter` over the level's ready files. The at-most-one invariant itself needs a
//! primitive `rayon` doesn't provide, so it's a keyed wait/notify map built from
//! `std::sync::{Mutex, Condvar}` — the smallest thing that satisfies "a second requester blocks on
//! the first's outcome" without pulling in a new concurrency dependency.

use crate::analysis::AnalysedFile;
use crate::cache::compile::{CompileCache, CompileRecord, Fingerprint, Lookup};
use crate::config::{Flags, WorkspacePaths};
use crate::error::{AggregatedError, Error};
use crate::hasher::{FileHash, FlagsHash};
use crate::report;
use crate::symbols::BuildTree;
use crate::tools::ToolBox;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex},
    time::Instant,
};

/// A single compiled source, ready to be linked or archived.
#[derive(Debug, Clone)]
pub struct CompiledFile {
    pub source: PathBuf,
    pub object_file: PathBuf,
    pub module_interface: Option<PathBuf>,
    pub fingerprint: Fingerprint,
}

enum InFlight {
    Running,
    Done(Result<CompiledFile, Error>),
}

/// Shared across every concurrent compile in a run so that two files that happen to produce the
/// same fingerprint never compile twice, even if they're reached from different `BuildTree`s.
#[derive(Default)]
pub struct InFlightMap {
    state: Mutex<HashMap<Fingerprint, Arc<(Mutex<InFlight>, Condvar)>>>,
}

impl InFlightMap {
    /// Runs `compile` for `fingerprint`, unless another thread is already doing so — in which
    /// case this call blocks until that thread publishes its result and reuses it.
    fn run_once(
        &self,
        fingerprint: Fingerprint,
        compile: impl FnOnce() -> Result<CompiledFile, Error>,
    ) -> Result<CompiledFile, Error> {
        enum Role {
            Owner(Arc<(Mutex<InFlight>, Condvar)>),
            Waiter(Arc<(Mutex<InFlight>, Condvar)>),
        }

        let role = {
            let mut guard = self.state.lock().unwrap();
            match guard.get(&fingerprint) {
                Some(existing) => Role::Waiter(existing.clone()),
                None => {
                    let fresh = Arc::new((Mutex::new(InFlight::Running), Condvar::new()));
                    guard.insert(fingerprint, fresh.clone());
                    Role::Owner(fresh)
                }
            }
        };

        match role {
            Role::Waiter(slot) => wait_for(&slot),
            Role::Owner(slot) => {
                let result = compile();
                let (lock, cvar) = &*slot;
                *lock.lock().unwrap() = InFlight::Done(result.clone_for_wait());
                cvar.notify_all();
                result
            }
        }
    }
}

fn wait_for(slot: &Arc<(Mutex<InFlight>, Condvar)>) -> Result<CompiledFile, Error> {
    let (lock, cvar) = &**slot;
    let mut guard = lock.lock().unwrap();
    loop {
        match &*guard {
            InFlight::Done(result) => return result.clone_for_wait(),
            InFlight::Running => {
                guard = cvar.wait(guard).unwrap();
            }
        }
    }
}

/// Small helper trait so `Result<CompiledFile, Error>` can be cheaply duplicated to every waiter
/// without requiring `Error` to implement `Clone` crate-wide (it wraps `std::io::Error`, which
/// doesn't).
trait CloneForWait {
    fn clone_for_wait(&self) -> Self;
}

impl CloneForWait for Result<CompiledFile, Error> {
    fn clone_for_wait(&self) -> Self {
        match self {
            Ok(c) => Ok(c.clone()),
            Err(e) => Err(Error::msg(e.to_string())),
        }
    }
}

/// Runs the full schedule for one [`BuildTree`], returning every compiled file or an aggregated
/// error if any compile failed (spec §4.6 failure semantics: failed compiles don't halt already
/// scheduled work, but nothing depending on a failure is scheduled).
pub struct Scheduler<'a> {
    by_path: &'a BTreeMap<PathBuf, AnalysedFile>,
    flags: &'a Flags,
    paths: &'a WorkspacePaths,
    tools: &'a ToolBox,
    cache: Arc<Mutex<CompileCache>>,
    in_flight: Arc<InFlightMap>,
    num_workers: usize,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        by_path: &'a BTreeMap<PathBuf, AnalysedFile>,
        flags: &'a Flags,
        paths: &'a WorkspacePaths,
        tools: &'a ToolBox,
        cache: Arc<Mutex<CompileCache>>,
        in_flight: Arc<InFlightMap>,
        num_workers: usize,
    ) -> Self {
        Self { by_path, flags, paths, tools, cache, in_flight, num_workers: num_workers.max(1) }
    }

    pub fn run(&self, tree: &BuildTree) -> Result<Vec<CompiledFile>, AggregatedError> {
        let mut remaining_deps: HashMap<PathBuf, usize> = HashMap::new();
        let mut dependents: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
        let mut module_interface_of: HashMap<String, PathBuf> = HashMap::new();

        for path in &tree.files {
            if let Some(file) = self.by_path.get(path) {
                if let AnalysedFile::Fortran(f) = file {
                    for module in &f.module_defs {
                        module_interface_of.insert(module.clone(), path.clone());
                    }
                }
            }
        }

        // Ordering must respect both explicit file_deps and module dependencies: a file can't
        // have its fingerprint computed (spec §4.6 step 2 folds in each dependency's module
        // interface hash) until whatever defines the modules it `use`s has already compiled.
        for path in &tree.files {
            let in_tree_deps: BTreeSet<PathBuf> = self
                .by_path
                .get(path)
                .map(|f| {
                    let mut deps: BTreeSet<PathBuf> =
                        f.file_deps().into_iter().filter(|d| tree.files.contains(d)).collect();
                    for symbol in f.symbol_deps() {
                        if let Some(definer) = module_interface_of.get(&symbol) {
                            if definer != path && tree.files.contains(definer) {
                                deps.insert(definer.clone());
                            }
                        }
                    }
                    deps
                })
                .unwrap_or_default();
            for dep in &in_tree_deps {
                dependents.entry(dep.clone()).or_default().push(path.clone());
            }
            remaining_deps.insert(path.clone(), in_tree_deps.len());
        }

        let mut done: BTreeMap<PathBuf, CompiledFile> = BTreeMap::new();
        let mut errors: Vec<Error> = Vec::new();

        let mut current_level: Vec<PathBuf> =
            remaining_deps.iter().filter(|(_, n)| **n == 0).map(|(p, _)| p.clone()).collect();
        current_level.sort();

        while !current_level.is_empty() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_workers)
                .build()
                .expect("failed to build compile worker pool");

            // A freshly spawned pool thread doesn't inherit the calling thread's scoped reporter,
            // so the default is captured here and re-installed on each worker inside the pool
            // (mirrors the teacher's `report::get_default`/`report::set_scoped` call sites around
            // its own `rayon` pool in `compile_parallel`).
            let reporter = report::get_default(Arc::clone);

            let results: Vec<(PathBuf, Result<CompiledFile, Error>)> = pool.install(|| {
                use rayon::prelude::*;
                let reporter = &reporter;
                current_level
                    .par_iter()
                    .map(|path| {
                        let _guard = report::set_scoped(reporter);
                        let file = self.by_path.get(path).expect("tree file must be analysed");
                        let module_iface_hashes = self.module_iface_hashes(file, &module_interface_of, &done);

                        reporter.compile_spawn(path);
                        let started = Instant::now();
                        let result = self.compile_one(file, &module_iface_hashes);
                        match &result {
                            Ok(_) => reporter.compile_success(path, started.elapsed()),
                            Err(_) => reporter.compile_failed(path),
                        }

                        (path.clone(), result)
                    })
                    .collect()
            });

            let mut next_level: BTreeSet<PathBuf> = BTreeSet::new();
            for (path, result) in results {
                match result {
                    Ok(compiled) => {
                        done.insert(path.clone(), compiled);
                        if let Some(children) = dependents.get(&path) {
                            for child in children {
                                if let Some(count) = remaining_deps.get_mut(child) {
                                    *count = count.saturating_sub(1);
                                    if *count == 0 {
                                        next_level.insert(child.clone());
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => errors.push(e),
                }
            }

            current_level = next_level.into_iter().collect();
        }

        if !errors.is_empty() {
            return Err(AggregatedError::new(errors));
        }
        Ok(done.into_values().collect())
    }

    fn module_iface_hashes(
        &self,
        file: &AnalysedFile,
        module_interface_of: &HashMap<String, PathBuf>,
        done: &BTreeMap<PathBuf, CompiledFile>,
    ) -> Vec<FileHash> {
        let mut hashes = Vec::new();
        let mut deps: Vec<String> = file.symbol_deps().into_iter().collect();
        deps.sort();
        for dep in deps {
            if let Some(definer) = module_interface_of.get(&dep) {
                if let Some(compiled) = done.get(definer) {
                    // use the fingerprint's own hash as the module interface hash stand-in; the
                    // compile cache keys on it directly so a change downstream is detected the
                    // same way a content hash change is (spec §4.6 step 2).
                    hashes.push(FileHash(compiled.fingerprint.0));
                }
            }
        }
        hashes
    }

    fn compile_one(&self, file: &AnalysedFile, module_iface_hashes: &[FileHash]) -> Result<CompiledFile, Error> {
        let path = file.fpath();
        let source_hash = file.file_hash().unwrap_or(FileHash(0));
        let flags = self.flags.resolve_with_paths(path, self.paths);
        let flags_hash = crate::hasher::hash_flags(&flags);
        let fingerprint = Fingerprint::new(source_hash, flags_hash, module_iface_hashes);

        self.in_flight.run_once(fingerprint, || {
            if let Lookup::Hit(record) = self.cache.lock().unwrap().lookup(fingerprint) {
                return Ok(CompiledFile {
                    source: path.to_path_buf(),
                    object_file: record.object_file,
                    module_interface: record.module_interface,
                    fingerprint,
                });
            }

            let record = invoke_compiler(self.tools, file, &flags, fingerprint)?;
            self.cache.lock().unwrap().insert(fingerprint, record.clone());
            Ok(CompiledFile {
                source: path.to_path_buf(),
                object_file: record.object_file,
                module_interface: record.module_interface,
                fingerprint,
            })
        })
    }
}

/// Invokes the appropriate compiler tool for `file` and builds a [`CompileRecord`] describing
/// where the resulting artefacts landed. Compiler invocation itself (argv construction beyond
/// flag substitution, subprocess wiring) is an external collaborator concern (spec §1), so this
/// delegates entirely to the [`ToolBox`]-resolved [`crate::tools::Tool`].
fn invoke_compiler(
    tools: &ToolBox,
    file: &AnalysedFile,
    flags: &[String],
    fingerprint: Fingerprint,
) -> Result<CompileRecord, Error> {
    let category = match file {
        AnalysedFile::Fortran(_) => crate::tools::Category::FortranCompiler,
        AnalysedFile::C(_) => crate::tools::Category::CCompiler,
        AnalysedFile::X90(_) | AnalysedFile::Empty { .. } => {
            return Err(Error::msg(format!(
                "no compiler category for {}",
                file.fpath().display()
            )))
        }
    };
    let tool = tools.get(category).ok_or_else(|| Error::ToolUnavailable(category.to_string()))?;
    tool.run(file.fpath(), flags, fingerprint).map_err(|e| Error::compile(file.fpath(), e.to_string()))
}

#[cfg(test)]
fn base_name(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysedFortran;
    use crate::config::Flags;
    use crate::tools::{Category, Tool, ToolBox};

    struct FakeCompiler;
    impl Tool for FakeCompiler {
        fn name(&self) -> &str {
            "fake-fortran"
        }
        fn category(&self) -> Category {
            Category::FortranCompiler
        }
        fn check_available(&self) -> bool {
            true
        }
        fn run(&self, source: &Path, _flags: &[String], fingerprint: Fingerprint) -> crate::error::Result<CompileRecord> {
            let dir = std::env::temp_dir().join(format!("fab-test-{}", fingerprint.0));
            std::fs::create_dir_all(&dir).unwrap();
            let obj = dir.join(format!("{}.o", base_name(source)));
            std::fs::write(&obj, b"object").unwrap();
            Ok(CompileRecord { object_file: obj, module_interface: None })
        }
    }

    fn fortran(path: &str, defs: &[&str], file_deps: &[&str]) -> AnalysedFile {
        let mut f = AnalysedFortran::new(PathBuf::from(path), FileHash(1));
        for d in defs {
            f.symbol_defs.insert(d.to_string());
        }
        for d in file_deps {
            f.file_deps.insert(PathBuf::from(d));
        }
        AnalysedFile::Fortran(f)
    }

    #[test]
    fn compiles_independent_files_in_one_level() {
        let files = vec![fortran("a.f90", &["a"], &[]), fortran("b.f90", &["b"], &[])];
        let by_path: BTreeMap<_, _> = files.into_iter().map(|f| (f.fpath().to_path_buf(), f)).collect();
        let tree = BuildTree {
            root_symbol: "a".into(),
            files: by_path.keys().cloned().collect(),
            missing: Default::default(),
        };

        let flags = Flags::default();
        let paths = WorkspacePaths::new("/ws");
        let mut tools = ToolBox::new();
        tools.add(Box::new(FakeCompiler));

        let cache = Arc::new(Mutex::new(CompileCache::new()));
        let in_flight = Arc::new(InFlightMap::default());
        let scheduler = Scheduler::new(&by_path, &flags, &paths, &tools, cache, in_flight, 2);

        let result = scheduler.run(&tree).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn failure_in_one_file_does_not_prevent_independent_compiles() {
        struct FailingCompiler;
        impl Tool for FailingCompiler {
            fn name(&self) -> &str {
                "failing"
            }
            fn category(&self) -> Category {
                Category::FortranCompiler
            }
            fn check_available(&self) -> bool {
                true
            }
            fn run(&self, source: &Path, _flags: &[String], _fp: Fingerprint) -> crate::error::Result<CompileRecord> {
                if source.to_string_lossy().contains("bad") {
                    Err(Error::compile(source, "boom"))
                } else {
                    let obj = std::env::temp_dir().join("ok.o");
                    std::fs::write(&obj, b"object").unwrap();
                    Ok(CompileRecord { object_file: obj, module_interface: None })
                }
            }
        }

        let files = vec![fortran("good.f90", &["good"], &[]), fortran("bad.f90", &["bad"], &[])];
        let by_path: BTreeMap<_, _> = files.into_iter().map(|f| (f.fpath().to_path_buf(), f)).collect();
        let tree = BuildTree {
            root_symbol: "good".into(),
            files: by_path.keys().cloned().collect(),
            missing: Default::default(),
        };

        let flags = Flags::default();
        let paths = WorkspacePaths::new("/ws");
        let mut tools = ToolBox::new();
        tools.add(Box::new(FailingCompiler));

        let cache = Arc::new(Mutex::new(CompileCache::new()));
        let in_flight = Arc::new(InFlightMap::default());
        let scheduler = Scheduler::new(&by_path, &flags, &paths, &tools, cache, in_flight, 2);

        let result = scheduler.run(&tree);
        assert!(result.is_err());
        let agg = result.unwrap_err();
        assert_eq!(agg.errors.len(), 1);
    }
}
