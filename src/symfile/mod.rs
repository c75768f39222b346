//! Symbol map file parsing
//!
//! Reads exported symbol maps and turns each line into a record that can be
//! applied to the function database. Two export formats exist:
//!
//! - `.sym`: `<rva> <symbol>; <mangledSymbol>;` - the mangled name is applied
//! - `.idasym`: `<rva> <symbol>;` - the plain symbol is applied
//!
//! Fields are separated by single spaces, and each name field carries one
//! stray trailing delimiter character that is stripped. There is no per-line
//! recovery: the first malformed line aborts the whole run.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

/// Symbol map errors
#[derive(Error, Debug)]
pub enum SymError {
    #[error("line {line}: expected {expected} fields, got {got}")]
    FieldCount {
        line: usize,
        expected: usize,
        got: usize,
    },

    #[error("line {line}: invalid address '{text}'")]
    BadAddress { line: usize, text: String },

    #[error("unrecognized symbol map extension: '{0}' (expected .sym or .idasym)")]
    UnknownFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Symbol map export format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymFormat {
    /// `.sym`: rva, symbol, mangled symbol
    Sym,
    /// `.idasym`: rva, symbol
    Ida,
}

impl SymFormat {
    /// Pick the format from the file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SymError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("sym") => Ok(SymFormat::Sym),
            Some("idasym") => Ok(SymFormat::Ida),
            other => Err(SymError::UnknownFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Number of space-separated fields a line of this format carries.
    pub fn field_count(self) -> usize {
        match self {
            SymFormat::Sym => 3,
            SymFormat::Ida => 2,
        }
    }
}

/// One parsed line of a symbol map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord {
    /// Relative virtual address of the function
    pub rva: u64,
    /// Human-readable symbol name
    pub symbol: String,
    /// Mangled symbol name (`.sym` format only)
    pub mangled: Option<String>,
}

impl SymbolRecord {
    /// The name that gets written into the database.
    ///
    /// The `.sym` export carries both forms and the mangled one is applied,
    /// so the host's demangled-names display can render it.
    pub fn applied_name(&self) -> &str {
        self.mangled.as_deref().unwrap_or(&self.symbol)
    }
}

/// Drop exactly one trailing character (the stray export delimiter).
fn strip_delimiter(field: &str) -> &str {
    let mut chars = field.chars();
    chars.next_back();
    chars.as_str()
}

/// Parse one line of a symbol map.
///
/// `line_no` is 1-based and only used for error reporting.
pub fn parse_line(line: &str, format: SymFormat, line_no: usize) -> Result<SymbolRecord, SymError> {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() != format.field_count() {
        return Err(SymError::FieldCount {
            line: line_no,
            expected: format.field_count(),
            got: parts.len(),
        });
    }

    let rva = parts[0].parse::<u64>().map_err(|_| SymError::BadAddress {
        line: line_no,
        text: parts[0].to_string(),
    })?;

    let symbol = strip_delimiter(parts[1]).to_string();
    let mangled = match format {
        SymFormat::Sym => Some(strip_delimiter(parts[2]).to_string()),
        SymFormat::Ida => None,
    };

    Ok(SymbolRecord {
        rva,
        symbol,
        mangled,
    })
}

/// Parse a whole symbol map file, format chosen by extension.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<SymbolRecord>, SymError> {
    let format = SymFormat::from_path(&path)?;
    let reader = BufReader::new(File::open(&path)?);

    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        records.push(parse_line(&line, format, idx + 1)?);
    }

    log::debug!(
        "parsed {} records from {}",
        records.len(),
        path.as_ref().display()
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(SymFormat::from_path("out.sym").unwrap(), SymFormat::Sym);
        assert_eq!(SymFormat::from_path("out.idasym").unwrap(), SymFormat::Ida);
        assert!(SymFormat::from_path("out.map").is_err());
        assert!(SymFormat::from_path("noext").is_err());
    }

    #[test]
    fn parse_sym_line() {
        let rec = parse_line("4198400 main; _Z4mainv;", SymFormat::Sym, 1).unwrap();
        assert_eq!(rec.rva, 4198400);
        assert_eq!(rec.symbol, "main");
        assert_eq!(rec.mangled.as_deref(), Some("_Z4mainv"));
        assert_eq!(rec.applied_name(), "_Z4mainv");
    }

    #[test]
    fn parse_ida_line() {
        let rec = parse_line("4198400 main;", SymFormat::Ida, 1).unwrap();
        assert_eq!(rec.rva, 4198400);
        assert_eq!(rec.symbol, "main");
        assert_eq!(rec.mangled, None);
        assert_eq!(rec.applied_name(), "main");
    }

    #[test]
    fn strips_exactly_one_trailing_char() {
        // A name that itself ends in the delimiter keeps everything but the
        // stray final one.
        let rec = parse_line("1 weird;; odd;;", SymFormat::Sym, 1).unwrap();
        assert_eq!(rec.symbol, "weird;");
        assert_eq!(rec.mangled.as_deref(), Some("odd;"));
    }

    #[test]
    fn wrong_field_count_is_an_error() {
        assert!(matches!(
            parse_line("4198400 main;", SymFormat::Sym, 7),
            Err(SymError::FieldCount {
                line: 7,
                expected: 3,
                got: 2
            })
        ));
        assert!(parse_line("", SymFormat::Ida, 1).is_err());
        assert!(parse_line("1 a; b; c;", SymFormat::Sym, 1).is_err());
    }

    #[test]
    fn non_numeric_address_is_an_error() {
        assert!(matches!(
            parse_line("0x1000 main;", SymFormat::Ida, 3),
            Err(SymError::BadAddress { line: 3, .. })
        ));
        assert!(parse_line("abc main; _m;", SymFormat::Sym, 1).is_err());
    }
}
