//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig
//!     → GatewayBuilder::from_config
//!     → command-line flags override individual fields
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the gateway is built; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{GatewayConfig, LoggingConfig, MetadataRuleConfig, ProbeConfig, TlsConfig};
pub use validation::{validate_config, ValidationError};
