//! Analysis Module - Binary loading
//!
//! Contains the goblin-based loader the database is seeded from.

pub mod loader;

pub use loader::{FunctionInfo, LoadedBinary, SectionInfo};
