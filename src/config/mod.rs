/*!
 * Config Module
 * Descriptor parsing and validation into AppSpecs
 */

pub mod descriptor;
pub mod loader;
pub mod quantity;
pub mod spec;

use crate::core::errors::ConfigError;

/// Config operation result
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export for convenience
pub use descriptor::{AppDescriptor, ArgsField, EcosystemDescriptor};
pub use loader::ConfigLoader;
pub use quantity::{parse_byte_quantity, split_command_line};
pub use spec::{AppSpec, Backoff, LogPaths, RestartPolicy};
