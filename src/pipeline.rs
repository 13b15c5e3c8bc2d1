//! The Pipeline Driver: runs an ordered list of [`Step`]s against a shared [`Store`] and
//! [`Config`] (spec §2: "a Pipeline Driver runs ordered stages against a shared Artefact Store and
//! a Config"). Replaces the legacy framework's step base class with the capability interface
//! named in spec §9 REDESIGN FLAGS: a `Step` is just `run(&Config, &mut Store) -> Result`.

use crate::analysis::{self, AnalysedFile};
use crate::cache::analysis::AnalysisCache;
use crate::cache::compile::CompileCache;
use crate::config::{Config, ToolKind};
use crate::error::{AggregatedError, Error, Result};
use crate::hasher;
use crate::report;
use crate::scheduler::Scheduler;
use crate::store::{Artefact, Key, Store};
use crate::symbols::{self, BuildTree, SymbolTable};
use crate::tools::ToolBox;
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
};

pub trait Step {
    fn name(&self) -> &str;
    fn run(&self, config: &Config, store: &mut Store) -> std::result::Result<(), AggregatedError>;
}

/// Runs every step in order, stopping at the first one that raises an [`AggregatedError`].
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    #[instrument(skip_all)]
    pub fn run(&self, config: &Config, store: &mut Store) -> std::result::Result<(), AggregatedError> {
        config.validate().map_err(|e| AggregatedError::new(vec![e]))?;
        for step in &self.steps {
            report::current().stage_started(step.name());
            step.run(config, store)?;
            report::current().stage_finished(step.name());
        }
        Ok(())
    }
}

/// Discovers every Fortran/C source under `config.paths.source`, analyses whatever the
/// [`AnalysisCache`] doesn't already have a hit for, and writes [`Key::AnalysedFiles`].
///
/// Fan-out follows the REDESIGN FLAGS direction for the legacy `imap_unordered` progress pattern:
/// worker threads send `(path, Result<AnalysedFile, Error>)` over an `mpsc::Sender`; the
/// collecting thread drains it, persisting each hit to the [`AnalysisCache`] eagerly rather than
/// waiting for the whole stage to finish, so an interrupted run still leaves a partially-useful
/// cache on disk.
pub struct AnalysisStep {
    pub analysis_cache_path: PathBuf,
}

impl Step for AnalysisStep {
    fn name(&self) -> &str {
        "analysis"
    }

    fn run(&self, config: &Config, store: &mut Store) -> std::result::Result<(), AggregatedError> {
        let fortran_files =
            crate::utils::source_files(&config.paths.source, &["f90", "F90"], &config.excluded_file_names);
        let c_files =
            crate::utils::source_files(&config.paths.source, &["c"], &config.excluded_file_names);

        let mut all_source: Vec<PathBuf> = fortran_files.iter().chain(c_files.iter()).cloned().collect();
        all_source.sort();
        store.put(Key::AllSource, Artefact::Paths(all_source));

        let cache = Arc::new(Mutex::new(AnalysisCache::read(&self.analysis_cache_path)));
        cache.lock().unwrap().retain_paths(|p| p.exists());

        let mut work: Vec<PathBuf> = fortran_files;
        work.extend(c_files);
        work.sort();

        let (tx, rx) = mpsc::channel::<(PathBuf, Result<AnalysedFile>)>();
        let num_workers = config.num_workers.max(1);

        // The pool runs on its own thread so the collector below can drain `rx` and persist to
        // the cache *while* analysis is still in flight, rather than only after every file has
        // finished — the "resume-friendly" property spec §9 REDESIGN FLAGS asks for.
        let cache_for_workers = cache.clone();
        let producer = std::thread::spawn(move || {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .build()
                .expect("failed to build analysis worker pool");
            pool.scope(move |scope| {
                for path in work {
                    let tx = tx.clone();
                    let cache = cache_for_workers.clone();
                    scope.spawn(move |_| {
                        let result = analyse_one(&path, &cache);
                        let _ = tx.send((path, result));
                    });
                }
            });
        });

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (path, result) in rx {
            match result {
                Ok(analysed) => {
                    report::current().file_analysed(&path);
                    if let Some(hash) = analysed.file_hash() {
                        cache.lock().unwrap().insert(path.clone(), hash, analysed.clone());
                        // persisted immediately so a crash mid-analysis still leaves every file
                        // analysed so far on disk, not just whatever finished before the stage
                        // as a whole completed.
                        let _ = cache.lock().unwrap().write(&self.analysis_cache_path);
                    }
                    results.push(analysed);
                }
                Err(e) => errors.push(e),
            }
        }
        producer.join().expect("analysis worker thread panicked");

        cache
            .lock()
            .unwrap()
            .write(&self.analysis_cache_path)
            .map_err(|e| AggregatedError::new(vec![e]))?;

        if !errors.is_empty() {
            return Err(AggregatedError::new(errors));
        }

        results.sort_by(|a, b| a.fpath().cmp(b.fpath()));
        link_mo_commented_deps(&mut results);
        store.put(Key::AnalysedFiles, Artefact::AnalysedFiles(results));
        Ok(())
    }
}

/// Post-analysis linking (spec §4.5 step 2, §8 scenario 6): a `! DEPENDS ON:` comment only gives
/// the analyser a bare file name (e.g. `bar.c`), lowered from a `.o` reference by the Fortran
/// analyser itself; once every file in the set is known, resolve each one against the analysed
/// set by base name and fold the match into the referencing file's `file_deps`, so the Tree
/// Extractor can walk it like any other file dependency instead of re-resolving it on every
/// extraction.
fn link_mo_commented_deps(files: &mut [AnalysedFile]) {
    let by_basename: BTreeMap<String, PathBuf> = files
        .iter()
        .filter_map(|f| {
            f.fpath().file_name().map(|name| (name.to_string_lossy().into_owned(), f.fpath().to_path_buf()))
        })
        .collect();

    let resolved: Vec<Vec<PathBuf>> = files
        .iter()
        .map(|f| {
            f.mo_commented_file_deps()
                .into_iter()
                .filter_map(|name| by_basename.get(&name).cloned())
                .collect()
        })
        .collect();

    for (file, deps) in files.iter_mut().zip(resolved) {
        for dep in deps {
            file.add_file_dep(dep);
        }
    }
}

fn analyse_one(path: &PathBuf, cache: &Arc<Mutex<AnalysisCache>>) -> Result<AnalysedFile> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    let hash = hasher::hash_bytes(content.as_bytes());

    if let crate::cache::analysis::Lookup::Hit(hit) = cache.lock().unwrap().lookup(path, hash) {
        return Ok(hit);
    }

    let is_fortran = path.extension().map(|e| e.eq_ignore_ascii_case("f90")).unwrap_or(false);
    let analysed = if is_fortran {
        analysis::fortran::analyse(path, &content, hash)
    } else {
        analysis::c::analyse(path, &content, hash)
    };
    Ok(analysed)
}

/// Builds the [`SymbolTable`] and one [`BuildTree`] per `config.root_symbols`, writing
/// [`Key::SymbolTable`] and [`Key::BuildTrees`] (spec §4.5).
pub struct ExtractionStep;

impl Step for ExtractionStep {
    fn name(&self) -> &str {
        "extraction"
    }

    fn run(&self, config: &Config, store: &mut Store) -> std::result::Result<(), AggregatedError> {
        let files = store
            .analysed_files(Key::AnalysedFiles)
            .map_err(|e| AggregatedError::new(vec![e]))?
            .to_vec();

        let table = SymbolTable::build(&files);
        let by_path: BTreeMap<PathBuf, AnalysedFile> =
            files.into_iter().map(|f| (f.fpath().to_path_buf(), f)).collect();

        let mut trees: BTreeMap<String, BuildTree> = BTreeMap::new();
        let mut missing_roots = Vec::new();
        for root in &config.root_symbols {
            if table.definer(root).is_none() {
                missing_roots.push(Error::unresolved_symbol(root.clone(), PathBuf::from("<config>")));
                continue;
            }
            let mut tree = symbols::extract_build_tree(root, &table, &by_path);
            for extra in &config.unreferenced_deps {
                if let Some(dep_path) = table.definer(extra) {
                    let injected = symbols::extract_build_tree(extra, &table, &by_path);
                    tree.files.extend(injected.files);
                    tree.missing.extend(injected.missing);
                    let _ = dep_path;
                } else {
                    tree.missing.insert(extra.clone());
                }
            }
            trees.insert(root.clone(), tree);
        }

        if !missing_roots.is_empty() {
            return Err(AggregatedError::new(missing_roots));
        }

        store.put(Key::SymbolTable, Artefact::SymbolTable(table));
        store.put(Key::BuildTrees, Artefact::BuildTrees(trees));
        Ok(())
    }
}

/// Compiles every [`BuildTree`] in [`Key::BuildTrees`], sharing one [`CompileCache`] and one
/// in-flight map across all of them (spec §9 open question: "Sharing ... is the correct
/// behaviour").
pub struct CompileStep {
    pub compile_cache_path: PathBuf,
    pub tools: ToolBox,
}

impl Step for CompileStep {
    fn name(&self) -> &str {
        "compile"
    }

    fn run(&self, config: &Config, store: &mut Store) -> std::result::Result<(), AggregatedError> {
        let files = store
            .analysed_files(Key::AnalysedFiles)
            .map_err(|e| AggregatedError::new(vec![e]))?
            .to_vec();
        let by_path: BTreeMap<PathBuf, AnalysedFile> =
            files.into_iter().map(|f| (f.fpath().to_path_buf(), f)).collect();
        let trees = store.build_trees(Key::BuildTrees).map_err(|e| AggregatedError::new(vec![e]))?.clone();

        let cache = Arc::new(Mutex::new(CompileCache::read(&self.compile_cache_path)));
        let in_flight = Arc::new(crate::scheduler::InFlightMap::default());

        let fortran_flags = config.flags_for(ToolKind::Fortran);
        let c_flags = config.flags_for(ToolKind::C);

        let mut compiled = Vec::new();
        let mut errors = Vec::new();
        for (root, tree) in &trees {
            let has_c = tree.files.iter().any(|p| by_path.get(p).map(is_c).unwrap_or(false));
            let flags = if has_c { &c_flags } else { &fortran_flags };
            let scheduler = Scheduler::new(
                &by_path,
                flags,
                &config.paths,
                &self.tools,
                cache.clone(),
                in_flight.clone(),
                config.num_workers,
            );
            match scheduler.run(tree) {
                Ok(mut files) => compiled.append(&mut files),
                Err(agg) => {
                    errors.push(Error::msg(format!("build of root `{root}` failed:\n{agg}")))
                }
            }
        }

        cache
            .lock()
            .unwrap()
            .write(&self.compile_cache_path)
            .map_err(|e| AggregatedError::new(vec![e]))?;

        if !errors.is_empty() {
            return Err(AggregatedError::new(errors));
        }

        store.put(Key::ObjectFiles, Artefact::CompiledFiles(compiled));
        Ok(())
    }
}

fn is_c(file: &AnalysedFile) -> bool {
    matches!(file, AnalysedFile::C(_))
}
