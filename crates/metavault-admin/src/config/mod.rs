//! Admin server configuration: YAML types, parsing with environment
//! substitution, and semantic validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_config, parse_config_str};
pub use types::AdminConfig;
pub use validator::validate_config;
