// All core functionality is in testforge-core
// This CLI acts as a thin wrapper around the core library

// CLI-specific modules
pub mod config_locator;

// Re-export core types for convenience
pub use testforge_core::*;

pub use config_locator::{resolve_config_path, user_config_path};
