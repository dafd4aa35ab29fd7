//! fixloop library crate
//!
//! Exposes the repair loop and its collaborators so the binary, benchmarks
//! and tests can drive them without going through CLI startup.

pub mod apply;
pub mod config;
pub mod error;
pub mod executor;
pub mod keyring;
pub mod llm;
pub mod logging;
pub mod parse;
pub mod prompt;
pub mod prompts;
pub mod repair;
pub mod research;
pub mod signature;
pub mod util;
pub mod web;
