//! mapparse - symbol map loader for disassembly databases
//!
//! Library surface shared by the binary and the integration tests.

pub mod analysis;
pub mod app;
pub mod db;
pub mod mapfile;
pub mod symfile;
pub mod ui;
