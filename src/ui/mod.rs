//! UI module - Command Line Interface
//!
//! Provides the reedline-based interactive console.

pub mod cli;
