//
// files.rs
//
// Source file model: identities, contents, and structural hashes
//

use std::fmt;
use std::sync::OnceLock;

/// Index of a file in the global file table.
///
/// Assigned on first entry and stable for the file's lifetime in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    /// Position of this file in dense per-file vectors.
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Typechecking strictness of a single file, from its sigil or the
/// configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StrictLevel {
    /// Parsed for definitions only; bodies are not checked.
    Ignore,
    /// Standard checking.
    #[default]
    Typed,
    /// Full checking, no implicit escapes.
    Strict,
}

impl StrictLevel {
    pub fn from_sigil(text: &str) -> Option<Self> {
        match text {
            "ignore" => Some(StrictLevel::Ignore),
            "typed" => Some(StrictLevel::Typed),
            "strict" => Some(StrictLevel::Strict),
            _ => None,
        }
    }
}

/// Hash over the top-level definition hierarchy of a file.
///
/// Two files with equal definition hashes make equivalent contributions to
/// the global symbol table, so a body-only edit keeps this hash stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionsHash {
    /// Sentinel for a hash that has not been computed yet. Must never be
    /// observed by the classifier once hashing has run.
    NotComputed,
    /// The file has a syntax error; any classification using this hash must
    /// be pessimistic.
    Invalid,
    Computed(u64),
}

impl DefinitionsHash {
    pub fn is_invalid(self) -> bool {
        matches!(self, DefinitionsHash::Invalid)
    }
}

/// Structural hash of a file: the definition-hierarchy part drives global
/// invalidation, the local part covers the full content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHash {
    pub definitions: DefinitionsHash,
    pub local: u64,
}

/// An immutable source file.
///
/// The hash and strict level are computed after construction and installed
/// exactly once; repeated installs are idempotent no-ops, which lets the
/// hashing workers race benignly on shared files.
#[derive(Debug)]
pub struct SourceFile {
    path: String,
    source: String,
    hash: OnceLock<FileHash>,
    strict_level: OnceLock<StrictLevel>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            hash: OnceLock::new(),
            strict_level: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The structural hash, or `None` if it has not been computed.
    pub fn hash(&self) -> Option<&FileHash> {
        self.hash.get()
    }

    /// Install the structural hash. First write wins.
    pub fn set_hash(&self, hash: FileHash) {
        let _ = self.hash.set(hash);
    }

    pub fn strict_level(&self) -> Option<StrictLevel> {
        self.strict_level.get().copied()
    }

    /// Install the strict level decided at file-table entry. First write wins.
    pub fn set_strict_level(&self, level: StrictLevel) {
        let _ = self.strict_level.set(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_hash_first_write_wins() {
        let file = SourceFile::new("a.sk", "def main() -> Unit {\n}\n");
        assert!(file.hash().is_none());

        file.set_hash(FileHash {
            definitions: DefinitionsHash::Computed(1),
            local: 10,
        });
        file.set_hash(FileHash {
            definitions: DefinitionsHash::Computed(2),
            local: 20,
        });

        let hash = file.hash().unwrap();
        assert_eq!(hash.definitions, DefinitionsHash::Computed(1));
        assert_eq!(hash.local, 10);
    }

    #[test]
    fn test_strict_level_from_sigil() {
        assert_eq!(StrictLevel::from_sigil("strict"), Some(StrictLevel::Strict));
        assert_eq!(StrictLevel::from_sigil("typed"), Some(StrictLevel::Typed));
        assert_eq!(StrictLevel::from_sigil("ignore"), Some(StrictLevel::Ignore));
        assert_eq!(StrictLevel::from_sigil("loose"), None);
    }

    #[test]
    fn test_file_id_display() {
        assert_eq!(FileId::new(3).to_string(), "#3");
        assert_eq!(FileId::new(3).idx(), 3);
    }
}
