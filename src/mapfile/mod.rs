//! MSVC linker map parsing
//!
//! Parses the `.map` file the linker emits alongside a binary and turns its
//! publics and static symbols into records the database understands. This is
//! the producing side of the exported formats: a `.map` can be applied
//! directly, or converted to a `.sym`/`.idasym` file for later use.
//!
//! The file is a staged, line-oriented format:
//!
//! ```text
//! <module name>
//!
//! Timestamp is <hex> (<human readable>)
//!
//! Preferred load address is <hex>
//!
//! Start          Length     Name      Class
//! 0001:00000000  00003780H  .text     CODE
//!
//! Address        Publics by Value     Rva+Base  Lib:Object
//! 0001:00000000  _lj_BC_ISLT          10001000  f  luajit-x86:lj_vm_x86.obj
//!
//! entry point at 0001:000c1660
//!
//! Static symbols
//! 0001:00002000  _vm_helper           10003000  f  lj_vm_x86.obj
//! ```
//!
//! Symbol rows carry the RVA with the preferred load address already added;
//! parsing rebases them, and the exporters add the base back, so the emitted
//! addresses match what the map carried. No demangling happens here: the raw
//! symbol goes out (sanitized for the `.idasym` name field).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::symfile::{SymFormat, SymbolRecord};

/// Linker map errors
#[derive(Error, Debug)]
pub enum MapError {
    #[error("line {line}: malformed segment address '{text}'")]
    BadAddress { line: usize, text: String },

    #[error("line {line}: malformed section length '{text}'")]
    BadLength { line: usize, text: String },

    #[error("line {line}: malformed rva '{text}'")]
    BadRva { line: usize, text: String },

    #[error("line {line}: rva {rva:#x} below preferred load address {base:#x}")]
    RvaUnderflow { line: usize, rva: u64, base: u64 },

    #[error("line {line}: unrecognized section class '{text}'")]
    UnknownClass { line: usize, text: String },

    #[error("line {line}: incomplete {what} row")]
    IncompleteRow { line: usize, what: &'static str },

    #[error("map header is missing '{0}'")]
    MissingHeader(&'static str),
}

/// A `segment:offset` address as the map prints it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegAddress {
    pub seg: u16,
    pub offset: u64,
}

/// Section class column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionClass {
    Code,
    Data,
}

/// One row of the section table
#[derive(Debug, Clone)]
pub struct MapSection {
    pub name: String,
    pub class: SectionClass,
    pub addr: SegAddress,
    pub len: u64,
}

/// Where a symbol came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOrigin {
    /// `lib:object` or bare `object` column
    LibObject { lib: Option<String>, object: String },
    /// `<absolute>` marker
    Absolute,
}

/// One public or static symbol row
#[derive(Debug, Clone)]
pub struct MapSymbol {
    /// Raw (mangled) symbol name
    pub symbol: String,
    /// Segment:offset address
    pub addr: SegAddress,
    /// RVA with the preferred load address subtracted (zero stays zero)
    pub rva: u64,
    /// Single-character flag columns (`f`, `i`, ...)
    pub flags: Vec<String>,
    pub origin: SymbolOrigin,
}

/// A parsed linker map
#[derive(Debug)]
pub struct MapFile {
    pub module_name: String,
    pub timestamp: String,
    pub preferred_load_addr: u64,
    pub entry_point: SegAddress,
    pub sections: Vec<MapSection>,
    pub publics: Vec<MapSymbol>,
    pub statics: Vec<MapSymbol>,
}

/// Parsing walks the file top to bottom through its fixed section order.
#[derive(Debug)]
enum Stage {
    Header,
    Sections,
    Publics,
    Statics,
}

impl MapFile {
    /// Parse a whole map file.
    ///
    /// The first malformed data row aborts the parse.
    pub fn parse(input: &str) -> Result<Self, MapError> {
        let mut stage = Stage::Header;

        let mut module_name: Option<String> = None;
        let mut timestamp: Option<String> = None;
        let mut load_addr: Option<u64> = None;
        let mut entry_point: Option<SegAddress> = None;
        let mut sections: Vec<MapSection> = Vec::new();
        let mut publics: Vec<MapSymbol> = Vec::new();
        let mut statics: Vec<MapSymbol> = Vec::new();

        for (idx, line) in input.lines().enumerate() {
            let line_no = idx + 1;

            match stage {
                Stage::Header => {
                    if line.contains("Timestamp is") {
                        let begin = line
                            .find('(')
                            .ok_or(MapError::MissingHeader("timestamp"))?;
                        let end = line
                            .rfind(')')
                            .ok_or(MapError::MissingHeader("timestamp"))?;
                        timestamp = Some(line[begin + 1..end].to_string());
                    } else if line.contains("Preferred load address is") {
                        let pos = line
                            .find("is ")
                            .ok_or(MapError::MissingHeader("preferred load address"))?;
                        load_addr = Some(
                            u64::from_str_radix(line[pos + 3..].trim(), 16).map_err(|_| {
                                MapError::MissingHeader("preferred load address")
                            })?,
                        );
                    } else if line.contains("Start") && line.contains("Length") {
                        stage = Stage::Sections;
                    } else if module_name.is_none() && !line.trim().is_empty() {
                        module_name = Some(line.trim().to_string());
                    }
                }
                Stage::Sections => {
                    if line.contains("Publics by") {
                        stage = Stage::Publics;
                        continue;
                    }
                    if let Some(section) = parse_section_row(line, line_no)? {
                        sections.push(section);
                    }
                }
                Stage::Publics => {
                    if line.contains("entry point at") {
                        let token = line
                            .split_whitespace()
                            .find(|t| t.contains(':'))
                            .ok_or(MapError::MissingHeader("entry point"))?;
                        entry_point = Some(parse_seg_address(token, line_no)?);
                        stage = Stage::Statics;
                        continue;
                    }
                    let base = load_addr.ok_or(MapError::MissingHeader("preferred load address"))?;
                    if let Some(symbol) = parse_symbol_row(line, base, line_no)? {
                        publics.push(symbol);
                    }
                }
                Stage::Statics => {
                    let base = load_addr.ok_or(MapError::MissingHeader("preferred load address"))?;
                    if let Some(symbol) = parse_symbol_row(line, base, line_no)? {
                        statics.push(symbol);
                    }
                }
            }
        }

        Ok(MapFile {
            module_name: module_name.ok_or(MapError::MissingHeader("module name"))?,
            timestamp: timestamp.ok_or(MapError::MissingHeader("timestamp"))?,
            preferred_load_addr: load_addr
                .ok_or(MapError::MissingHeader("preferred load address"))?,
            entry_point: entry_point.ok_or(MapError::MissingHeader("entry point"))?,
            sections,
            publics,
            statics,
        })
    }

    /// Load and parse a map file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let input = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        let map = Self::parse(&input)
            .with_context(|| format!("failed to parse {}", path.as_ref().display()))?;
        log::info!(
            "parsed map for {}: {} publics, {} statics",
            map.module_name,
            map.publics.len(),
            map.statics.len()
        );
        Ok(map)
    }

    /// All symbols (publics then statics) as database records.
    ///
    /// Addresses come back out as Rva+Base, the form the map carried and the
    /// exported files use; a zero rva stays zero so the consuming side skips
    /// it. The symbol field is sanitized, the mangled field is the raw name.
    pub fn records(&self) -> Vec<SymbolRecord> {
        self.publics
            .iter()
            .chain(self.statics.iter())
            .map(|s| SymbolRecord {
                rva: if s.rva == 0 {
                    0
                } else {
                    s.rva + self.preferred_load_addr
                },
                symbol: sanitize_symbol(&s.symbol),
                mangled: Some(s.symbol.clone()),
            })
            .collect()
    }

    /// Render the map's symbols in one of the exported formats.
    pub fn export(&self, format: SymFormat) -> String {
        let mut output = String::new();
        for record in self.records() {
            let line = match format {
                SymFormat::Sym => format!(
                    "{} {}; {};\n",
                    record.rva,
                    record.symbol,
                    record.applied_name()
                ),
                SymFormat::Ida => format!("{} {};\n", record.rva, record.symbol),
            };
            output.push_str(&line);
        }
        output
    }
}

/// Read a `.map` file and write it out as `.sym` or `.idasym` (picked from
/// the output extension). Returns the number of exported records.
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<usize> {
    let format = SymFormat::from_path(&output)?;
    let map = MapFile::from_file(&input)?;
    let records = map.records().len();

    fs::write(&output, map.export(format))
        .with_context(|| format!("failed to write {}", output.as_ref().display()))?;
    log::info!(
        "exported {} records to {}",
        records,
        output.as_ref().display()
    );
    Ok(records)
}

/// Replace every character the host won't accept in a name with `_`.
pub fn sanitize_symbol(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '?' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_seg_address(text: &str, line_no: usize) -> Result<SegAddress, MapError> {
    let err = || MapError::BadAddress {
        line: line_no,
        text: text.to_string(),
    };
    let (seg, offset) = text.split_once(':').ok_or_else(err)?;
    Ok(SegAddress {
        seg: seg.parse().map_err(|_| err())?,
        offset: u64::from_str_radix(offset, 16).map_err(|_| err())?,
    })
}

/// Parse one section table row. Header and blank lines come back as None.
fn parse_section_row(line: &str, line_no: usize) -> Result<Option<MapSection>, MapError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    // data rows always start with a seg:offset column
    match fields.first() {
        Some(first) if first.contains(':') => {}
        _ => return Ok(None),
    }
    if fields.len() < 4 {
        return Err(MapError::IncompleteRow {
            line: line_no,
            what: "section",
        });
    }

    let addr = parse_seg_address(fields[0], line_no)?;
    let len_text = fields[1].strip_suffix('H').unwrap_or(fields[1]);
    let len = u64::from_str_radix(len_text, 16).map_err(|_| MapError::BadLength {
        line: line_no,
        text: fields[1].to_string(),
    })?;
    let class = match fields[3] {
        "CODE" => SectionClass::Code,
        "DATA" => SectionClass::Data,
        other => {
            return Err(MapError::UnknownClass {
                line: line_no,
                text: other.to_string(),
            })
        }
    };

    Ok(Some(MapSection {
        name: fields[2].to_string(),
        class,
        addr,
        len,
    }))
}

/// Parse one publics/statics row. Header and blank lines come back as None.
fn parse_symbol_row(
    line: &str,
    load_addr: u64,
    line_no: usize,
) -> Result<Option<MapSymbol>, MapError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.first() {
        Some(first) if first.contains(':') => {}
        _ => return Ok(None),
    }
    if fields.len() < 4 {
        return Err(MapError::IncompleteRow {
            line: line_no,
            what: "symbol",
        });
    }

    let addr = parse_seg_address(fields[0], line_no)?;
    let symbol = fields[1].to_string();

    let rva_with_base = u64::from_str_radix(fields[2], 16).map_err(|_| MapError::BadRva {
        line: line_no,
        text: fields[2].to_string(),
    })?;
    let rva = if rva_with_base == 0 {
        0
    } else {
        rva_with_base
            .checked_sub(load_addr)
            .ok_or(MapError::RvaUnderflow {
                line: line_no,
                rva: rva_with_base,
                base: load_addr,
            })?
    };

    let mut flags: Vec<String> = Vec::new();
    let mut origin: Option<SymbolOrigin> = None;
    for token in &fields[3..] {
        if *token == "<absolute>" {
            origin = Some(SymbolOrigin::Absolute);
        } else if token.chars().count() == 1 {
            flags.push(token.to_string());
        } else {
            origin = Some(match token.split_once(':') {
                Some((lib, object)) => SymbolOrigin::LibObject {
                    lib: Some(lib.to_string()),
                    object: object.to_string(),
                },
                None => SymbolOrigin::LibObject {
                    lib: None,
                    object: token.to_string(),
                },
            });
        }
    }
    let origin = origin.ok_or(MapError::IncompleteRow {
        line: line_no,
        what: "symbol",
    })?;

    Ok(Some(MapSymbol {
        symbol,
        addr,
        rva,
        flags,
        origin,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symfile;

    const SAMPLE: &str = "\
 csgo-x86\r\n\
\r\n\
 Timestamp is 5e9e66b1 (Tue Apr 21 00:00:00 2020)\r\n\
\r\n\
 Preferred load address is 10000000\r\n\
\r\n\
 Start         Length     Name                   Class\r\n\
 0001:00000000 00003780H .text                   CODE\r\n\
 0003:00000000 00000104H .data                   DATA\r\n\
\r\n\
  Address         Publics by Value              Rva+Base       Lib:Object\r\n\
\r\n\
 0001:00000000       _lj_BC_ISLT                10001000 f   luajit-x86:lj_vm_x86.obj\r\n\
 0001:00000010       ?helper@@YAXXZ             10001010 f i lj_obj.obj\r\n\
 0000:00000000       ___safe_se_handler_count   00000000     <absolute>\r\n\
 entry point at        0001:000c1660\r\n\
\r\n\
 Static symbols\r\n\
\r\n\
 0001:00002000       _vm_helper                 10003000 f   lj_vm_x86.obj\r\n";

    #[test]
    fn parses_header() {
        let map = MapFile::parse(SAMPLE).unwrap();
        assert_eq!(map.module_name, "csgo-x86");
        assert_eq!(map.timestamp, "Tue Apr 21 00:00:00 2020");
        assert_eq!(map.preferred_load_addr, 0x1000_0000);
        assert_eq!(
            map.entry_point,
            SegAddress {
                seg: 1,
                offset: 0xc1660
            }
        );
    }

    #[test]
    fn parses_sections() {
        let map = MapFile::parse(SAMPLE).unwrap();
        assert_eq!(map.sections.len(), 2);
        assert_eq!(map.sections[0].name, ".text");
        assert_eq!(map.sections[0].class, SectionClass::Code);
        assert_eq!(map.sections[0].len, 0x3780);
        assert_eq!(map.sections[1].class, SectionClass::Data);
        assert_eq!(map.sections[1].addr.seg, 3);
    }

    #[test]
    fn rebases_rvas() {
        let map = MapFile::parse(SAMPLE).unwrap();
        assert_eq!(map.publics.len(), 3);
        assert_eq!(map.publics[0].symbol, "_lj_BC_ISLT");
        assert_eq!(map.publics[0].rva, 0x1000);
        assert_eq!(map.publics[1].rva, 0x1010);
        // absolute symbol at zero stays zero
        assert_eq!(map.publics[2].rva, 0);
        assert_eq!(map.publics[2].origin, SymbolOrigin::Absolute);
    }

    #[test]
    fn splits_flags_from_libobject() {
        let map = MapFile::parse(SAMPLE).unwrap();
        assert_eq!(map.publics[0].flags, vec!["f"]);
        assert_eq!(
            map.publics[0].origin,
            SymbolOrigin::LibObject {
                lib: Some("luajit-x86".into()),
                object: "lj_vm_x86.obj".into(),
            }
        );
        assert_eq!(map.publics[1].flags, vec!["f", "i"]);
        assert_eq!(
            map.publics[1].origin,
            SymbolOrigin::LibObject {
                lib: None,
                object: "lj_obj.obj".into(),
            }
        );
    }

    #[test]
    fn statics_follow_entry_point() {
        let map = MapFile::parse(SAMPLE).unwrap();
        assert_eq!(map.statics.len(), 1);
        assert_eq!(map.statics[0].symbol, "_vm_helper");
        assert_eq!(map.statics[0].rva, 0x3000);
    }

    #[test]
    fn records_carry_rva_plus_base() {
        let map = MapFile::parse(SAMPLE).unwrap();
        let records = map.records();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].rva, 0x1000_1000);
        assert_eq!(records[0].symbol, "_lj_BC_ISLT");
        assert_eq!(records[0].mangled.as_deref(), Some("_lj_BC_ISLT"));
        // zero survives so the applying side skips it
        assert_eq!(records[2].rva, 0);
        // statics come after publics
        assert_eq!(records[3].rva, 0x1000_3000);
    }

    #[test]
    fn export_round_trips_through_symfile() {
        let map = MapFile::parse(SAMPLE).unwrap();

        let ida = map.export(SymFormat::Ida);
        let first = ida.lines().next().unwrap();
        assert_eq!(first, format!("{} _lj_BC_ISLT;", 0x1000_1000u64));
        let rec = symfile::parse_line(first, SymFormat::Ida, 1).unwrap();
        assert_eq!(rec.rva, 0x1000_1000);
        assert_eq!(rec.symbol, "_lj_BC_ISLT");

        let sym = map.export(SymFormat::Sym);
        let second = sym.lines().nth(1).unwrap();
        let rec = symfile::parse_line(second, SymFormat::Sym, 2).unwrap();
        assert_eq!(rec.symbol, "?helper@@YAXXZ");
        assert_eq!(rec.applied_name(), "?helper@@YAXXZ");
    }

    #[test]
    fn sanitizes_host_rejected_characters() {
        assert_eq!(sanitize_symbol("operator new"), "operator_new");
        assert_eq!(sanitize_symbol("a.b(c)"), "a_b_c_");
        assert_eq!(sanitize_symbol("?h@@YAXXZ$1"), "?h@@YAXXZ$1");
    }

    #[test]
    fn rva_below_base_is_an_error() {
        let input = SAMPLE.replace("10001000", "00000100");
        assert!(matches!(
            MapFile::parse(&input),
            Err(MapError::RvaUnderflow { .. })
        ));
    }

    #[test]
    fn unknown_section_class_is_an_error() {
        let input = SAMPLE.replace("CODE", "BSS");
        assert!(matches!(
            MapFile::parse(&input),
            Err(MapError::UnknownClass { .. })
        ));
    }

    #[test]
    fn truncated_header_is_an_error() {
        assert!(matches!(
            MapFile::parse(" csgo-x86\r\n"),
            Err(MapError::MissingHeader(_))
        ));
    }
}
