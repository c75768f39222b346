//! App module - shared application state
//!
//! Provides the state used by both the console and the headless path.

mod state;

pub use state::*;
