//! Binary Loader Module
//!
//! Parses PE/ELF/Mach-O executables using goblin and extracts the function
//! and section tables the database is seeded from. Functions the format
//! carries no symbol for are reported with an empty name; the database
//! assigns those their placeholder.

use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

/// Executable container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Pe,
    Elf,
    MachO,
}

impl std::fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryFormat::Pe => write!(f, "PE"),
            BinaryFormat::Elf => write!(f, "ELF"),
            BinaryFormat::MachO => write!(f, "Mach-O"),
        }
    }
}

/// Information about a function found in the binary
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// Function name (empty for unnamed functions)
    pub name: String,
    /// Virtual address of the function
    pub address: u64,
    /// Size in bytes (0 if unknown)
    pub size: u64,
    /// Whether this is an exported function
    pub is_export: bool,
    /// Whether this is an imported function (stub)
    pub is_import: bool,
}

/// Information about a section in the binary
#[derive(Debug, Clone)]
pub struct SectionInfo {
    /// Section name
    pub name: String,
    /// Virtual address
    pub virtual_address: u64,
    /// Size in memory
    pub virtual_size: u64,
    /// Offset in file
    pub file_offset: u64,
    /// Is this section executable?
    pub is_executable: bool,
}

/// Parsed binary information
#[derive(Debug)]
pub struct LoadedBinary {
    /// Original file path
    pub path: String,
    /// Raw bytes of the file
    pub data: Vec<u8>,
    /// Entry point address
    pub entry_point: u64,
    /// Image base address
    pub image_base: u64,
    /// All discovered functions
    pub functions: Vec<FunctionInfo>,
    /// All sections
    pub sections: Vec<SectionInfo>,
    /// Is this a 64-bit binary?
    pub is_64bit: bool,
    /// Binary format
    pub format: BinaryFormat,
}

impl LoadedBinary {
    /// Load and parse a binary file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let data = fs::read(&path)?;
        Self::from_bytes(data, path_str)
    }

    /// Parse binary from bytes, dispatching on magic
    pub fn from_bytes(data: Vec<u8>, path: String) -> Result<Self> {
        if data.len() < 4 {
            return Err(anyhow!("File too small"));
        }

        if data[0] == 0x4D && data[1] == 0x5A {
            return Self::parse_pe(data, path);
        }

        if data[0..4] == [0x7F, b'E', b'L', b'F'] {
            return Self::parse_elf(data, path);
        }

        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if matches!(magic, 0xFEEDFACE | 0xFEEDFACF | 0xCEFAEDFE | 0xCFFAEDFE) {
            return Self::parse_macho(data, path);
        }

        Err(anyhow!("Unknown binary format"))
    }

    /// Parse PE (Windows executable)
    fn parse_pe(data: Vec<u8>, path: String) -> Result<Self> {
        let pe = goblin::pe::PE::parse(&data)?;

        let is_64bit = pe.is_64;
        let image_base = pe.image_base as u64;
        let entry_point = image_base + pe.entry as u64;

        let mut sections = Vec::new();
        for section in &pe.sections {
            let name = String::from_utf8_lossy(&section.name)
                .trim_end_matches('\0')
                .to_string();

            sections.push(SectionInfo {
                name,
                virtual_address: image_base + section.virtual_address as u64,
                virtual_size: section.virtual_size as u64,
                file_offset: section.pointer_to_raw_data as u64,
                is_executable: (section.characteristics & 0x20000000) != 0,
            });
        }

        // Exports are the only named functions PE gives us for free
        let mut functions = Vec::new();
        for export in &pe.exports {
            functions.push(FunctionInfo {
                name: export.name.map(str::to_string).unwrap_or_default(),
                address: image_base + export.rva as u64,
                size: 0,
                is_export: true,
                is_import: false,
            });
        }

        for import in &pe.imports {
            functions.push(FunctionInfo {
                name: import.name.to_string(),
                address: image_base + import.rva as u64,
                size: 0,
                is_export: false,
                is_import: true,
            });
        }

        if !functions.iter().any(|f| f.address == entry_point) {
            functions.push(FunctionInfo {
                name: String::new(),
                address: entry_point,
                size: 0,
                is_export: false,
                is_import: false,
            });
        }

        Ok(Self {
            path,
            data,
            entry_point,
            image_base,
            functions,
            sections,
            is_64bit,
            format: BinaryFormat::Pe,
        })
    }

    /// Parse ELF (Linux executable)
    fn parse_elf(data: Vec<u8>, path: String) -> Result<Self> {
        let elf = goblin::elf::Elf::parse(&data)?;

        let is_64bit = elf.is_64;
        let entry_point = elf.entry;

        let image_base = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == goblin::elf::program_header::PT_LOAD)
            .map(|ph| ph.p_vaddr)
            .min()
            .unwrap_or(0);

        let mut sections = Vec::new();
        for section in &elf.section_headers {
            let name = elf
                .shdr_strtab
                .get_at(section.sh_name)
                .unwrap_or("")
                .to_string();
            sections.push(SectionInfo {
                name,
                virtual_address: section.sh_addr,
                virtual_size: section.sh_size,
                file_offset: section.sh_offset,
                is_executable: (section.sh_flags
                    & goblin::elf::section_header::SHF_EXECINSTR as u64)
                    != 0,
            });
        }

        let mut functions = Vec::new();
        for sym in &elf.syms {
            if sym.st_type() == goblin::elf::sym::STT_FUNC && sym.st_value != 0 {
                let name = elf.strtab.get_at(sym.st_name).unwrap_or("").to_string();
                functions.push(FunctionInfo {
                    name,
                    address: sym.st_value,
                    size: sym.st_size,
                    is_export: sym.st_bind() == goblin::elf::sym::STB_GLOBAL,
                    is_import: sym.st_shndx == goblin::elf::section_header::SHN_UNDEF as usize,
                });
            }
        }

        for sym in &elf.dynsyms {
            if sym.st_type() == goblin::elf::sym::STT_FUNC && sym.st_value != 0 {
                if functions.iter().any(|f| f.address == sym.st_value) {
                    continue;
                }
                let name = elf.dynstrtab.get_at(sym.st_name).unwrap_or("").to_string();
                functions.push(FunctionInfo {
                    name,
                    address: sym.st_value,
                    size: sym.st_size,
                    is_export: sym.st_bind() == goblin::elf::sym::STB_GLOBAL,
                    is_import: sym.st_shndx == goblin::elf::section_header::SHN_UNDEF as usize,
                });
            }
        }

        if entry_point != 0 && !functions.iter().any(|f| f.address == entry_point) {
            functions.push(FunctionInfo {
                name: String::new(),
                address: entry_point,
                size: 0,
                is_export: false,
                is_import: false,
            });
        }

        Ok(Self {
            path,
            data,
            entry_point,
            image_base,
            functions,
            sections,
            is_64bit,
            format: BinaryFormat::Elf,
        })
    }

    /// Parse Mach-O (macOS executable)
    fn parse_macho(data: Vec<u8>, path: String) -> Result<Self> {
        let mach = goblin::mach::Mach::parse(&data)?;

        let macho = match mach {
            goblin::mach::Mach::Binary(macho) => macho,
            goblin::mach::Mach::Fat(_) => {
                return Err(anyhow!("Fat Mach-O binaries not yet supported"))
            }
        };

        let is_64bit = macho.is_64;
        let entry_point = macho.entry;

        let mut sections = Vec::new();
        for segment in &macho.segments {
            sections.push(SectionInfo {
                name: segment.name().unwrap_or("").to_string(),
                virtual_address: segment.vmaddr,
                virtual_size: segment.vmsize,
                file_offset: segment.fileoff,
                is_executable: (segment.initprot & 0x4) != 0,
            });
        }

        let mut functions = Vec::new();
        if let Ok(exports) = macho.exports() {
            for export in exports {
                functions.push(FunctionInfo {
                    name: export.name.to_string(),
                    address: export.offset,
                    size: 0,
                    is_export: true,
                    is_import: false,
                });
            }
        }

        if entry_point != 0 && !functions.iter().any(|f| f.address == entry_point) {
            functions.push(FunctionInfo {
                name: String::new(),
                address: entry_point,
                size: 0,
                is_export: false,
                is_import: false,
            });
        }

        Ok(Self {
            path,
            data,
            entry_point,
            image_base: 0,
            functions,
            sections,
            is_64bit,
            format: BinaryFormat::MachO,
        })
    }

    /// Get bytes at a given virtual address
    pub fn get_bytes(&self, address: u64, size: usize) -> Option<&[u8]> {
        for section in &self.sections {
            if address >= section.virtual_address
                && address < section.virtual_address + section.virtual_size
            {
                let offset_in_section = address - section.virtual_address;
                let start = (section.file_offset + offset_in_section) as usize;
                let end = (start + size).min(self.data.len());

                if start < self.data.len() {
                    return Some(&self.data[start..end]);
                }
            }
        }
        None
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        format!(
            "{} {} binary\n\
             Entry: 0x{:x}\n\
             Image Base: 0x{:x}\n\
             Sections: {}\n\
             Functions: {}",
            if self.is_64bit { "64-bit" } else { "32-bit" },
            self.format,
            self.entry_point,
            self.image_base,
            self.sections.len(),
            self.functions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_self() {
        // Parse the test executable itself
        let exe_path = std::env::current_exe().unwrap();
        let result = LoadedBinary::from_file(&exe_path);

        if let Ok(binary) = result {
            println!("{}", binary.summary());
            assert!(binary.entry_point != 0);
            assert!(!binary.sections.is_empty());
        } else {
            println!("Could not parse self: {:?}", result);
        }
    }

    #[test]
    fn test_reject_garbage() {
        assert!(LoadedBinary::from_bytes(vec![0x00, 0x01], "x".into()).is_err());
        assert!(LoadedBinary::from_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00], "x".into()).is_err());
    }
}
