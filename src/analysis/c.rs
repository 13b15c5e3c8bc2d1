//! Analyses a preprocessed, pragma-annotated C translation unit.
//!
//! C is analysed after both the preprocessor and the pragma injector have already run (spec §1:
//! those are external collaborators), so `#include` directives that survive are wrapped in
//! `#pragma FAB UsrIncludeStart/End` or `#pragma FAB SysIncludeStart/End` markers, and a system
//! include's full expansion sits between its `Sys` markers. Only own-file content and user-include
//! regions contribute to symbol resolution (spec §4.3); system-include regions are skipped
//! entirely, since they're the expanded text of a header this crate doesn't own. Like the Fortran
//! analyser this is a line scanner over regex patterns, not a C parser (spec §1 non-goals: no
//! semantic type-checking).

use super::{AnalysedC, AnalysedFile};
use crate::hasher::{self, FileHash};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// `// DEPENDS ON: some_symbol` and `/* DEPENDS ON: some_symbol */`, the C-side equivalent of the
/// Fortran analyser's directive (spec §4.3).
static RE_DEPENDS_ON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?://|/\*)\s*DEPENDS\s+ON\s*:\s*([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// `#pragma FAB UsrIncludeStart/End` and `#pragma FAB SysIncludeStart/End`, injected one pair per
/// surviving `#include` by the (external) pragma injector step.
static RE_PRAGMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#\s*pragma\s+FAB\s+(Usr|Sys)Include(Start|End)\s*$").unwrap());

#[derive(Clone, Copy, PartialEq, Eq)]
enum Region {
    Own,
    Usr,
    Sys,
}

/// A still-present `#include "local.h"` (quoted, not angle-bracket) naming a sibling source file.
static RE_LOCAL_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*#\s*include\s*"([^"]+)"\s*$"#).unwrap());

/// Top-level function definition: return type, name, `(`, and an opening brace reachable without
/// a trailing semicolon (i.e. not a prototype). We require the brace to appear before end of
/// line or on a line of its own, which covers the K&R and Allman styles without a full parser.
static RE_FUNCTION_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:static\s+|extern\s+|inline\s+)*[A-Za-z_][A-Za-z0-9_ \t\*]*\b([A-Za-z_][A-Za-z0-9_]*)\s*\(([^;)]*)\)\s*\{?\s*$").unwrap()
});

/// A bare call expression: `name(`, used as the dependency heuristic once a function's own body
/// has started.
static RE_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());

const C_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "sizeof", "else", "do", "goto", "case", "default",
    "typedef", "struct", "union", "enum", "static", "extern", "inline", "const", "volatile",
];

pub fn analyse(fpath: &Path, content: &str, file_hash: FileHash) -> AnalysedFile {
    let mut unit = AnalysedC::new(fpath.to_path_buf(), file_hash);
    let mut brace_depth: i32 = 0;
    let mut current_fn: Option<String> = None;
    let mut region = Region::Own;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(caps) = RE_PRAGMA.captures(trimmed) {
            region = match (&caps[1], &caps[2]) {
                ("Usr", "Start") => Region::Usr,
                ("Sys", "Start") => Region::Sys,
                (_, "End") => Region::Own,
                _ => region,
            };
            continue;
        }

        if region == Region::Sys {
            continue;
        }

        for caps in RE_DEPENDS_ON.captures_iter(trimmed) {
            unit.symbol_deps.insert(caps[1].to_string());
        }

        if let Some(caps) = RE_LOCAL_INCLUDE.captures(trimmed) {
            unit.file_deps.insert(Path::new(&caps[1]).to_path_buf());
            continue;
        }

        if brace_depth == 0 {
            if let Some(caps) = RE_FUNCTION_DEF.captures(trimmed) {
                let name = caps[1].to_string();
                if !C_KEYWORDS.contains(&name.as_str()) {
                    unit.symbol_defs.insert(name.clone());
                    current_fn = Some(name);
                }
            }
        }

        brace_depth += trimmed.matches('{').count() as i32;
        brace_depth -= trimmed.matches('}').count() as i32;
        if brace_depth <= 0 {
            brace_depth = 0;
            current_fn = None;
        }

        if current_fn.is_some() {
            for caps in RE_CALL.captures_iter(trimmed) {
                let name = &caps[1];
                if C_KEYWORDS.contains(&name) || unit.symbol_defs.contains(name) {
                    continue;
                }
                unit.symbol_deps.insert(name.to_string());
            }
        }
    }

    if unit.symbol_defs.is_empty() && unit.symbol_deps.is_empty() && unit.file_deps.is_empty() {
        AnalysedFile::Empty { fpath: fpath.to_path_buf() }
    } else {
        AnalysedFile::C(unit)
    }
}

pub fn analyse_file(fpath: &Path) -> crate::error::Result<AnalysedFile> {
    let content = std::fs::read_to_string(fpath).map_err(|e| crate::error::Error::io(e, fpath))?;
    let hash = hasher::hash_bytes(content.as_bytes());
    Ok(analyse(fpath, &content, hash))
}
