//! Shared application state
//!
//! Owns the loaded binary and the function database the symbol maps are
//! applied to. Used by both the console and the headless path.

use std::path::Path;

use anyhow::{Context, Result};

use crate::analysis::loader::LoadedBinary;
use crate::db::{ApplySummary, FunctionDb};
use crate::mapfile::MapFile;
use crate::symfile;

/// Shared application state
#[derive(Default)]
pub struct AppState {
    /// Currently loaded binary
    pub binary: Option<LoadedBinary>,
    /// Function name database seeded from the binary
    pub db: FunctionDb,
    /// Outcome of the most recent symbol map application
    pub last_summary: Option<ApplySummary>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a binary is loaded
    pub fn has_binary(&self) -> bool {
        self.binary.is_some()
    }

    /// Get binary path if loaded
    pub fn binary_path(&self) -> Option<&str> {
        self.binary.as_ref().map(|b| b.path.as_str())
    }

    /// Get function count
    pub fn function_count(&self) -> usize {
        self.db.len()
    }

    /// Load a binary and reseed the database from it.
    ///
    /// Replaces any previously loaded binary and discards its renames.
    pub fn load_binary(&mut self, path: &str) -> Result<()> {
        let binary =
            LoadedBinary::from_file(path).with_context(|| format!("failed to load {}", path))?;
        log::info!("loaded {}: {} functions", path, binary.functions.len());

        self.db = FunctionDb::from_binary(&binary);
        self.binary = Some(binary);
        self.last_summary = None;
        Ok(())
    }

    /// Parse a symbol map file and apply it to the database.
    ///
    /// `.sym` and `.idasym` exports go through the line parser; a linker
    /// `.map` is applied directly via its own parser.
    pub fn apply_symbols(&mut self, path: &str) -> Result<ApplySummary> {
        let is_linker_map = Path::new(path).extension().and_then(|e| e.to_str()) == Some("map");
        let records = if is_linker_map {
            MapFile::from_file(path)?.records()
        } else {
            symfile::parse_file(path).with_context(|| format!("failed to parse {}", path))?
        };

        let summary = self.db.apply_all(&records);
        self.last_summary = Some(summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn empty_state_has_no_binary() {
        let state = AppState::new();
        assert!(!state.has_binary());
        assert_eq!(state.binary_path(), None);
        assert_eq!(state.function_count(), 0);
    }

    #[test]
    fn apply_symbols_accepts_linker_maps() {
        let map = "\
 demo\r\n\
\r\n\
 Timestamp is 0 (now)\r\n\
\r\n\
 Preferred load address is 10000000\r\n\
\r\n\
 Start         Length     Name   Class\r\n\
 0001:00000000 00001000H .text   CODE\r\n\
\r\n\
  Address       Publics by Value   Rva+Base   Lib:Object\r\n\
 0001:00000000  _entry             10001000 f demo.obj\r\n\
 entry point at 0001:00000000\r\n";
        let path = std::env::temp_dir().join(format!("mapparse_state_{}.map", std::process::id()));
        fs::write(&path, map).unwrap();

        let mut state = AppState::new();
        state.db.set_name(0x1000_1000, "sub_10001000");
        let summary = state
            .apply_symbols(path.to_str().unwrap())
            .unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(summary.renamed, 1);
        assert_eq!(state.db.name_at(0x1000_1000), Some("_entry"));
        assert_eq!(state.last_summary, Some(summary));
    }
}
