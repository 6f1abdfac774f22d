//
// pipeline.rs
//
// Parsing and symbol-entry pipeline consumed by the indexer
//
// The surrounding server owns the full frontend; the indexer only needs the
// definition hierarchy of each file and content-addressed hashes over it.
// Definitions are recovered with a line scanner in the same spirit as the
// rest of the frontend: no AST survives past this module.
//

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use lru::LruCache;

use crate::config::IndexerConfig;
use crate::errors::{ErrorQueue, IndexError};
use crate::files::{DefinitionsHash, FileHash, FileId, SourceFile, StrictLevel};
use crate::global_state::GlobalState;
use crate::workers::WorkerPool;

/// A top-level definition contributing to the global symbol table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Definition {
    pub kind: DefKind,
    pub name: String,
    /// Signature text after the name, up to the body opener. Bodies do not
    /// contribute to the definition hierarchy.
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefKind {
    Function,
    Class,
    Enum,
    TypeAlias,
}

/// The processed form of one file: its id plus the scanned definitions.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file: FileId,
    pub defs: Arc<Vec<Definition>>,
}

impl ParsedFile {
    /// A placeholder for file-table slots never delivered through an edit
    /// (the prelude, padding in dense vectors).
    pub fn empty(file: FileId) -> Self {
        Self {
            file,
            defs: Arc::new(Vec::new()),
        }
    }
}

/// Bounded cache of scanned definitions keyed by local content hash.
///
/// Opaque to the indexer; only clean parses are cached so diagnostics are
/// re-derived for files that still have errors.
pub struct ParseCache {
    inner: Mutex<LruCache<u64, Arc<Vec<Definition>>>>,
}

impl std::fmt::Debug for ParseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseCache").finish_non_exhaustive()
    }
}

impl ParseCache {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn get(&self, local_hash: u64) -> Option<Arc<Vec<Definition>>> {
        self.inner.lock().unwrap().get(&local_hash).cloned()
    }

    fn insert(&self, local_hash: u64, defs: Arc<Vec<Definition>>) {
        self.inner.lock().unwrap().push(local_hash, defs);
    }
}

struct ScanResult {
    defs: Vec<Definition>,
    errors: Vec<IndexError>,
    valid: bool,
}

fn leading_identifier(text: &str) -> Option<&str> {
    let mut end = 0;
    for (i, ch) in text.char_indices() {
        let valid = if i == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_'
        };
        if !valid {
            break;
        }
        end = i + ch.len_utf8();
    }
    if end == 0 {
        None
    } else {
        Some(&text[..end])
    }
}

fn signature_text(tail: &str) -> String {
    tail.split('{').next().unwrap_or("").trim().to_string()
}

/// Scan the top-level definition hierarchy of a file.
///
/// Never fails: malformed input degrades to `valid = false` plus
/// diagnostics, which the hasher folds into an `Invalid` definitions hash.
fn scan_definitions(path: &str, source: &str) -> ScanResult {
    let mut result = ScanResult {
        defs: Vec::new(),
        errors: Vec::new(),
        valid: true,
    };
    let mut depth: i64 = 0;

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let code = raw.split("//").next().unwrap_or("");
        let trimmed = code.trim();

        if depth == 0 && !trimmed.is_empty() {
            let parsed = if let Some(rest) = trimmed.strip_prefix("def ") {
                scan_header(DefKind::Function, rest)
            } else if let Some(rest) = trimmed.strip_prefix("class ") {
                scan_header(DefKind::Class, rest)
            } else if let Some(rest) = trimmed.strip_prefix("enum ") {
                scan_header(DefKind::Enum, rest)
            } else if let Some(rest) = trimmed.strip_prefix("type ") {
                scan_type_alias(rest)
            } else {
                Err("expected a top-level definition")
            };
            match parsed {
                Ok(def) => result.defs.push(def),
                Err(message) => {
                    result.valid = false;
                    result.errors.push(IndexError {
                        path: path.to_string(),
                        line,
                        message: message.to_string(),
                    });
                }
            }
        }

        for ch in code.chars() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        result.valid = false;
                        result.errors.push(IndexError {
                            path: path.to_string(),
                            line,
                            message: "unmatched '}'".to_string(),
                        });
                        depth = 0;
                    }
                }
                _ => {}
            }
        }
    }

    if depth > 0 {
        result.valid = false;
        result.errors.push(IndexError {
            path: path.to_string(),
            line: source.lines().count(),
            message: "unclosed '{' at end of file".to_string(),
        });
    }

    result
}

fn scan_header(kind: DefKind, rest: &str) -> Result<Definition, &'static str> {
    let name = leading_identifier(rest).ok_or("definition is missing a name")?;
    let tail = &rest[name.len()..];
    Ok(Definition {
        kind,
        name: name.to_string(),
        signature: signature_text(tail),
    })
}

fn scan_type_alias(rest: &str) -> Result<Definition, &'static str> {
    let name = leading_identifier(rest).ok_or("type alias is missing a name")?;
    let tail = rest[name.len()..].trim_start();
    let aliased = tail
        .strip_prefix('=')
        .ok_or("type alias is missing '=' and a right-hand side")?;
    Ok(Definition {
        kind: DefKind::TypeAlias,
        name: name.to_string(),
        signature: aliased.trim().to_string(),
    })
}

fn hash_content(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

fn hash_definitions(defs: &[Definition]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for def in defs {
        def.hash(&mut hasher);
    }
    hasher.finish()
}

/// Compute the structural hash of a file.
///
/// A file that fails to scan yields an `Invalid` definitions hash rather
/// than an error; the classifier treats that pessimistically.
pub fn compute_file_hash(file: &SourceFile) -> FileHash {
    let scan = scan_definitions(file.path(), file.source());
    let definitions = if scan.valid {
        DefinitionsHash::Computed(hash_definitions(&scan.defs))
    } else {
        DefinitionsHash::Invalid
    };
    FileHash {
        definitions,
        local: hash_content(file.source()),
    }
}

/// Read the configured input files from disk and enter them into the file
/// table, assigning strict levels as they arrive.
pub fn reserve_files(
    gs: &mut GlobalState,
    paths: &[impl AsRef<Path>],
    config: &IndexerConfig,
) -> anyhow::Result<Vec<FileId>> {
    let mut frefs = Vec::with_capacity(paths.len());
    let mut table = gs.unfreeze_file_table();
    for path in paths {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        let file = Arc::new(SourceFile::new(path.to_string_lossy(), source));
        let fref = match table.find_file_by_path(file.path()) {
            Some(fref) => {
                table.replace_file(fref, file);
                fref
            }
            None => table.enter_file(file),
        };
        let level = decide_strict_level(&table, fref, config);
        table.file(fref).set_strict_level(level);
        frefs.push(fref);
    }
    Ok(frefs)
}

/// Scan definitions for the given files, consulting the parse cache by
/// content hash. Diagnostics go to the global state's error queue; output is
/// sorted by `FileId`.
pub fn index(
    gs: &GlobalState,
    frefs: &[FileId],
    _config: &IndexerConfig,
    workers: &WorkerPool,
    kvstore: Option<Arc<ParseCache>>,
) -> Vec<ParsedFile> {
    if frefs.is_empty() {
        return Vec::new();
    }

    let (fref_tx, fref_rx) = crossbeam_channel::bounded::<FileId>(frefs.len());
    for fref in frefs {
        fref_tx.send(*fref).expect("file queue rejected a file id");
    }
    drop(fref_tx);

    let (result_tx, result_rx) = crossbeam_channel::bounded::<Vec<ParsedFile>>(frefs.len());
    let files: Vec<Arc<SourceFile>> = frefs.iter().map(|f| gs.file(*f).clone()).collect();
    let by_fref: std::collections::HashMap<FileId, Arc<SourceFile>> =
        frefs.iter().copied().zip(files).collect();
    let errors = gs.error_queue().clone();

    let job = workers.multiplex_job("index", move || {
        let mut batch = Vec::new();
        while let Ok(fref) = fref_rx.try_recv() {
            let file = &by_fref[&fref];
            batch.push(parse_one(fref, file, kvstore.as_deref(), &errors));
        }
        if !batch.is_empty() {
            let _ = result_tx.send(batch);
        }
    });

    let mut parsed = Vec::with_capacity(frefs.len());
    loop {
        match result_rx.recv_timeout(WorkerPool::BLOCK_INTERVAL) {
            Ok(batch) => parsed.extend(batch),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                log::trace!("waiting on {} files to index", frefs.len() - parsed.len());
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    job.join();

    parsed.sort_by_key(|p| p.file);
    parsed
}

fn parse_one(
    fref: FileId,
    file: &SourceFile,
    kvstore: Option<&ParseCache>,
    errors: &ErrorQueue,
) -> ParsedFile {
    let local_hash = hash_content(file.source());
    if let Some(defs) = kvstore.and_then(|cache| cache.get(local_hash)) {
        return ParsedFile { file: fref, defs };
    }

    let scan = scan_definitions(file.path(), file.source());
    for error in scan.errors {
        errors.push(error);
    }
    let defs = Arc::new(scan.defs);
    if scan.valid {
        if let Some(cache) = kvstore {
            cache.insert(local_hash, defs.clone());
        }
    }
    ParsedFile { file: fref, defs }
}

/// Decide the strict level of a file from its `// strict:` sigil, falling
/// back to the configured default.
pub fn decide_strict_level(gs: &GlobalState, fref: FileId, config: &IndexerConfig) -> StrictLevel {
    let file = gs.file(fref);
    for raw in file.source().lines() {
        if let Some(value) = raw.trim().strip_prefix("// strict:") {
            match StrictLevel::from_sigil(value.trim()) {
                Some(level) => return level,
                None => {
                    log::warn!(
                        "{}: unknown strict sigil {:?}, using default",
                        file.path(),
                        value.trim()
                    );
                    return config.default_strict_level;
                }
            }
        }
    }
    config.default_strict_level
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = "\
class Point {
  x: Int
  y: Int
}

def length(p: Point) -> Float {
  sqrt(p.x * p.x + p.y * p.y)
}

type Distance = Float
";

    #[test]
    fn test_scan_finds_top_level_definitions() {
        let scan = scan_definitions("a.sk", CLEAN);
        assert!(scan.valid);
        assert!(scan.errors.is_empty());
        let names: Vec<&str> = scan.defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Point", "length", "Distance"]);
        assert_eq!(scan.defs[1].kind, DefKind::Function);
        assert_eq!(scan.defs[1].signature, "(p: Point) -> Float");
        assert_eq!(scan.defs[2].signature, "Float");
    }

    #[test]
    fn test_scan_ignores_bodies_and_comments() {
        let a = scan_definitions("a.sk", "def f() -> Int {\n  1\n}\n");
        let b = scan_definitions("a.sk", "// changed comment\ndef f() -> Int {\n  2\n}\n");
        assert_eq!(hash_definitions(&a.defs), hash_definitions(&b.defs));
    }

    #[test]
    fn test_scan_reports_missing_name() {
        let scan = scan_definitions("a.sk", "def () -> Int {\n}\n");
        assert!(!scan.valid);
        assert_eq!(scan.errors.len(), 1);
        assert_eq!(scan.errors[0].line, 1);
    }

    #[test]
    fn test_scan_reports_unbalanced_braces() {
        let open = scan_definitions("a.sk", "def f() -> Int {\n");
        assert!(!open.valid);

        let close = scan_definitions("a.sk", "def f() -> Int {\n}\n}\n");
        assert!(!close.valid);
        assert!(close.errors[0].message.contains("unmatched"));
    }

    #[test]
    fn test_scan_rejects_stray_statements() {
        let scan = scan_definitions("a.sk", "x = 1\n");
        assert!(!scan.valid);
    }

    #[test]
    fn test_hash_separates_definitions_from_bodies() {
        let original = SourceFile::new("a.sk", "def f() -> Int {\n  1\n}\n");
        let body_edit = SourceFile::new("a.sk", "def f() -> Int {\n  2\n}\n");
        let signature_edit = SourceFile::new("a.sk", "def f() -> Float {\n  1\n}\n");

        let h0 = compute_file_hash(&original);
        let h1 = compute_file_hash(&body_edit);
        let h2 = compute_file_hash(&signature_edit);

        assert_eq!(h0.definitions, h1.definitions);
        assert_ne!(h0.local, h1.local);
        assert_ne!(h0.definitions, h2.definitions);
    }

    #[test]
    fn test_hash_invalid_on_syntax_error() {
        let broken = SourceFile::new("a.sk", "def f() -> Int {\n");
        let hash = compute_file_hash(&broken);
        assert_eq!(hash.definitions, DefinitionsHash::Invalid);
    }

    #[test]
    fn test_index_sorted_and_reports_errors() {
        let mut gs = GlobalState::new();
        let (a, b) = {
            let mut table = gs.unfreeze_file_table();
            let a = table.enter_file(Arc::new(SourceFile::new("a.sk", "def f() -> Int {\n}\n")));
            let b = table.enter_file(Arc::new(SourceFile::new("b.sk", "def (\n")));
            (a, b)
        };

        // Deliberately out of order; output must come back sorted by id.
        let parsed = index(
            &gs,
            &[b, a],
            &IndexerConfig::default(),
            &WorkerPool::new(0),
            None,
        );
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].file, a);
        assert_eq!(parsed[1].file, b);
        assert_eq!(parsed[0].defs.len(), 1);
        assert!(!gs.error_queue().is_empty());
    }

    #[test]
    fn test_index_uses_parse_cache() {
        let mut gs = GlobalState::new();
        let fref = {
            let mut table = gs.unfreeze_file_table();
            table.enter_file(Arc::new(SourceFile::new("a.sk", "def f() -> Int {\n}\n")))
        };

        let cache = Arc::new(ParseCache::with_capacity(16));
        let config = IndexerConfig::default();
        let pool = WorkerPool::new(0);
        let first = index(&gs, &[fref], &config, &pool, Some(cache.clone()));
        let second = index(&gs, &[fref], &config, &pool, Some(cache.clone()));
        // The second run serves the same Arc out of the cache.
        assert!(Arc::ptr_eq(&first[0].defs, &second[0].defs));
    }

    #[test]
    fn test_index_parallel_matches_inline() {
        let mut gs = GlobalState::new();
        let frefs: Vec<FileId> = {
            let mut table = gs.unfreeze_file_table();
            (0..32)
                .map(|i| {
                    table.enter_file(Arc::new(SourceFile::new(
                        format!("f{i}.sk"),
                        format!("def f{i}() -> Int {{\n  {i}\n}}\n"),
                    )))
                })
                .collect()
        };

        let config = IndexerConfig::default();
        let inline = index(&gs, &frefs, &config, &WorkerPool::new(0), None);
        let parallel = index(&gs, &frefs, &config, &WorkerPool::new(4), None);
        assert_eq!(inline.len(), parallel.len());
        for (a, b) in inline.iter().zip(parallel.iter()) {
            assert_eq!(a.file, b.file);
            assert_eq!(a.defs, b.defs);
        }
    }

    #[test]
    fn test_decide_strict_level_sigil() {
        let mut gs = GlobalState::new();
        let config = IndexerConfig::default();
        let (strict, plain) = {
            let mut table = gs.unfreeze_file_table();
            let strict = table.enter_file(Arc::new(SourceFile::new(
                "s.sk",
                "// strict: strict\ndef f() -> Int {\n}\n",
            )));
            let plain = table.enter_file(Arc::new(SourceFile::new("p.sk", "def g() -> Int {\n}\n")));
            (strict, plain)
        };
        assert_eq!(
            decide_strict_level(&gs, strict, &config),
            StrictLevel::Strict
        );
        assert_eq!(decide_strict_level(&gs, plain, &config), StrictLevel::Typed);
    }
}
