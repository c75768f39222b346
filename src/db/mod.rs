//! Function name database
//!
//! In-memory stand-in for the disassembler's database. Seeded from the
//! binary loader, it holds the current name for every known function address
//! and hands out placeholder names (`sub_<hexaddr>`) for functions the
//! loader found without a symbol. A rename from a symbol map only lands on
//! functions still carrying such a placeholder; names set by the loader or
//! by the user are never overwritten.

use std::collections::BTreeMap;

use crate::analysis::loader::LoadedBinary;
use crate::symfile::SymbolRecord;

/// Prefix of auto-generated function names.
pub const PLACEHOLDER_PREFIX: &str = "sub_";

/// What happened when a symbol record was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Placeholder name replaced with the record's name
    Renamed,
    /// Function already had a real name; left unchanged
    Kept,
    /// No function at that address
    Missing,
    /// Record had address zero
    ZeroAddress,
}

/// Counters for one symbol map run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub renamed: usize,
    pub kept: usize,
    pub missing: usize,
    pub zero: usize,
}

impl ApplySummary {
    pub fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Renamed => self.renamed += 1,
            ApplyOutcome::Kept => self.kept += 1,
            ApplyOutcome::Missing => self.missing += 1,
            ApplyOutcome::ZeroAddress => self.zero += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.renamed + self.kept + self.missing + self.zero
    }

    /// One-line console report.
    pub fn report(&self) -> String {
        format!(
            "[*] {} records: {} renamed, {} kept, {} unknown address, {} zero",
            self.total(),
            self.renamed,
            self.kept,
            self.missing,
            self.zero
        )
    }
}

/// The function name database.
#[derive(Debug, Default)]
pub struct FunctionDb {
    /// Current name per function address, ordered for listing
    names: BTreeMap<u64, String>,
}

impl FunctionDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the database from a loaded binary.
    ///
    /// Functions without a symbol get a placeholder name.
    pub fn from_binary(binary: &LoadedBinary) -> Self {
        let mut db = Self::new();
        for func in &binary.functions {
            let name = if func.name.is_empty() {
                format!("{}{:x}", PLACEHOLDER_PREFIX, func.address)
            } else {
                func.name.clone()
            };
            db.names.insert(func.address, name);
        }
        log::info!("database seeded with {} functions", db.len());
        db
    }

    /// Current name of the function at `rva`, if one exists there.
    pub fn name_at(&self, rva: u64) -> Option<&str> {
        self.names.get(&rva).map(String::as_str)
    }

    /// Unconditionally set the name at `rva`. Creates the entry if missing.
    pub fn set_name(&mut self, rva: u64, name: &str) {
        self.names.insert(rva, name.to_string());
    }

    /// Apply one symbol record, honoring the placeholder rule.
    pub fn apply(&mut self, record: &SymbolRecord) -> ApplyOutcome {
        if record.rva == 0 {
            return ApplyOutcome::ZeroAddress;
        }

        match self.names.get_mut(&record.rva) {
            None => ApplyOutcome::Missing,
            Some(current) if !current.starts_with(PLACEHOLDER_PREFIX) => ApplyOutcome::Kept,
            Some(current) => {
                log::debug!(
                    "rename {:#x}: {} -> {}",
                    record.rva,
                    current,
                    record.applied_name()
                );
                *current = record.applied_name().to_string();
                ApplyOutcome::Renamed
            }
        }
    }

    /// Apply a whole parsed map, tallying outcomes.
    pub fn apply_all(&mut self, records: &[SymbolRecord]) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for record in records {
            summary.record(self.apply(record));
        }
        summary
    }

    /// Functions in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.names.iter().map(|(addr, name)| (*addr, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rva: u64, name: &str) -> SymbolRecord {
        SymbolRecord {
            rva,
            symbol: name.to_string(),
            mangled: None,
        }
    }

    fn mangled_record(rva: u64, name: &str, mangled: &str) -> SymbolRecord {
        SymbolRecord {
            rva,
            symbol: name.to_string(),
            mangled: Some(mangled.to_string()),
        }
    }

    #[test]
    fn zero_address_is_skipped() {
        let mut db = FunctionDb::new();
        db.set_name(0, "sub_0");
        assert_eq!(db.apply(&record(0, "main")), ApplyOutcome::ZeroAddress);
        assert_eq!(db.name_at(0), Some("sub_0"));
    }

    #[test]
    fn real_name_is_kept() {
        let mut db = FunctionDb::new();
        db.set_name(0x1000, "memcpy");
        assert_eq!(db.apply(&record(0x1000, "my_memcpy")), ApplyOutcome::Kept);
        assert_eq!(db.name_at(0x1000), Some("memcpy"));
    }

    #[test]
    fn placeholder_is_renamed() {
        let mut db = FunctionDb::new();
        db.set_name(0x1000, "sub_1000");
        assert_eq!(db.apply(&record(0x1000, "main")), ApplyOutcome::Renamed);
        assert_eq!(db.name_at(0x1000), Some("main"));
    }

    #[test]
    fn mangled_name_wins_when_present() {
        let mut db = FunctionDb::new();
        db.set_name(0x2000, "sub_2000");
        let rec = mangled_record(0x2000, "run()", "_Z3runv");
        assert_eq!(db.apply(&rec), ApplyOutcome::Renamed);
        assert_eq!(db.name_at(0x2000), Some("_Z3runv"));
    }

    #[test]
    fn unknown_address_is_skipped() {
        let mut db = FunctionDb::new();
        assert_eq!(db.apply(&record(0xdead, "ghost")), ApplyOutcome::Missing);
        assert_eq!(db.name_at(0xdead), None);
    }

    #[test]
    fn apply_all_tallies_outcomes() {
        let mut db = FunctionDb::new();
        db.set_name(0x1000, "sub_1000");
        db.set_name(0x2000, "init");

        let records = vec![
            record(0x1000, "main"),
            record(0x2000, "start"),
            record(0x3000, "ghost"),
            record(0, "null"),
        ];
        let summary = db.apply_all(&records);
        assert_eq!(summary.renamed, 1);
        assert_eq!(summary.kept, 1);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.zero, 1);
        assert_eq!(summary.total(), 4);
    }
}
