//
// config.rs
//
// Configuration for the indexer core
//

use std::path::PathBuf;

use crate::files::StrictLevel;

/// Indexer configuration.
///
/// Loaded by the surrounding server from its own sources; the core only
/// reads it.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Force every edit onto the slow path. Used as an escape hatch when a
    /// fast-path bug is suspected in production.
    pub disable_fast_path: bool,
    /// Workspace files indexed during `initialize`.
    pub input_file_names: Vec<PathBuf>,
    /// Strict level for files without a `// strict:` sigil.
    pub default_strict_level: StrictLevel,
    /// Capacity of the parse cache shared with the pipeline.
    pub parse_cache_capacity: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            disable_fast_path: false,
            input_file_names: Vec::new(),
            default_strict_level: StrictLevel::Typed,
            parse_cache_capacity: 2048,
        }
    }
}

impl IndexerConfig {
    /// Log the effective configuration at startup.
    pub fn log_summary(&self) {
        log::info!("Indexer configuration:");
        log::info!("  disable_fast_path: {}", self.disable_fast_path);
        log::info!("  input files: {}", self.input_file_names.len());
        log::info!("  default_strict_level: {:?}", self.default_strict_level);
        log::info!("  parse_cache_capacity: {}", self.parse_cache_capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = IndexerConfig::default();
        assert!(!config.disable_fast_path);
        assert!(config.input_file_names.is_empty());
        assert_eq!(config.default_strict_level, StrictLevel::Typed);
        assert_eq!(config.parse_cache_capacity, 2048);
    }
}
