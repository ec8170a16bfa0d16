//! Configuration for glyphtap
//!
//! This crate handles parsing the KDL configuration file, the built-in symbol
//! table, key names, and the control socket protocol shared by the daemon and
//! the CLI.

mod defaults;
mod error;
mod generator;
pub mod ipc;
pub mod keys;
mod model;
mod parser;

pub use defaults::default_mappings;
pub use error::ConfigError;
pub use generator::{generate_config, write_config, write_default_config};
pub use model::*;
pub use parser::{parse_config, parse_config_str};
