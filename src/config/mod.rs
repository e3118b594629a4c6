//! Configuration loading and validation.
//!
//! A read-only snapshot loaded once at startup; components receive the
//! sections they need through their constructors.

mod loader;
mod types;

pub use loader::resolve_config_path;
pub use types::*;
