//! Runtime configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's config file named by `TETHER_CONFIG_RS` (compile-time)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .stack_size(256 * 1024)
//!     .embedded(true);
//! tether_runtime::init(config)?;
//! ```

pub mod defaults;

use tether_core::env::{env_get, env_get_bool, env_get_str};

/// Smallest stack we accept for spawned threads
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Runtime configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for threads spawned through `ThreadBuilder`
    pub stack_size: usize,
    /// Name prefix for spawned threads (`<prefix>-<id>`)
    pub thread_name_prefix: String,
    /// Running inside a dynamically loaded module: the host calls `fini()`
    /// itself, so the finalization stack is never registered with `atexit`
    pub embedded: bool,
    /// Raise the log level to debug at `init()`
    pub debug_logging: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `TETHER_STACK_SIZE` - Spawned thread stack size in bytes
    /// - `TETHER_THREAD_NAME_PREFIX` - Spawned thread name prefix
    /// - `TETHER_EMBEDDED` - Skip `atexit` registration (0/1)
    /// - `TETHER_DEBUG` - Enable debug logging (0/1)
    pub fn from_env() -> Self {
        Self {
            stack_size: env_get("TETHER_STACK_SIZE", defaults::STACK_SIZE),
            thread_name_prefix: env_get_str(
                "TETHER_THREAD_NAME_PREFIX",
                defaults::THREAD_NAME_PREFIX,
            ),
            embedded: env_get_bool("TETHER_EMBEDDED", defaults::EMBEDDED),
            debug_logging: env_get_bool("TETHER_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Compile-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            stack_size: defaults::STACK_SIZE,
            thread_name_prefix: defaults::THREAD_NAME_PREFIX.to_string(),
            embedded: defaults::EMBEDDED,
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn embedded(mut self, embedded: bool) -> Self {
        self.embedded = embedded;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 64KB"));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::InvalidValue("thread_name_prefix must not be empty"));
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(ConfigError::InvalidValue("thread_name_prefix must not contain NUL"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("Tether Configuration:");
        eprintln!("  stack_size:          {}", self.stack_size);
        eprintln!("  thread_name_prefix:  {}", self.thread_name_prefix);
        eprintln!("  embedded:            {}", self.embedded);
        eprintln!("  debug_logging:       {}", self.debug_logging);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
