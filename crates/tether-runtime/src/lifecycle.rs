//! Process-level `init()` / `fini()` entry points
//!
//! The host calls `init` once before any other use and `fini` once after
//! all use. A main executable may skip `fini`: unless embedded, the
//! finalization stack is already registered to run at process exit.
//! A dynamically loaded module must call `fini` before it is unloaded.

use std::sync::OnceLock;
use tether_core::{kdebug, kinfo, kprint, RuntimeError, RuntimeResult};
use crate::config::{ConfigError, RuntimeConfig};
use crate::finalize::FinalizationStack;

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();
static DEFAULTS: OnceLock<RuntimeConfig> = OnceLock::new();

/// Initialize the runtime with `config`
///
/// Fails with `InvalidConfig` if the configuration does not validate and
/// with `AlreadyInitialized` on every call after the first successful one.
pub fn init(config: RuntimeConfig) -> RuntimeResult<()> {
    config.validate().map_err(|e| match e {
        ConfigError::InvalidValue(msg) => RuntimeError::InvalidConfig(msg),
    })?;

    let debug_logging = config.debug_logging;
    let embedded = config.embedded;
    CONFIG.set(config).map_err(|_| RuntimeError::AlreadyInitialized)?;

    kprint::init();
    if debug_logging {
        kprint::set_log_level(kprint::LogLevel::Debug);
    }
    FinalizationStack::global().set_embedded(embedded);

    kinfo!("tether runtime initialized{}", if embedded { " (embedded)" } else { "" });
    Ok(())
}

/// Run every pending finalization hook
///
/// Safe to call more than once; later calls only run hooks registered since.
pub fn fini() {
    let stack = FinalizationStack::global();
    kdebug!("tether runtime finalizing ({} hooks)", stack.len());
    stack.exec();
}

/// Active configuration
///
/// Before `init()` this is the environment-derived default.
pub fn config() -> &'static RuntimeConfig {
    match CONFIG.get() {
        Some(config) => config,
        None => DEFAULTS.get_or_init(RuntimeConfig::from_env),
    }
}

/// Has `init()` succeeded?
pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected_before_registration() {
        let err = init(RuntimeConfig::new().stack_size(1024)).unwrap_err();
        assert_eq!(err, RuntimeError::InvalidConfig("stack_size must be >= 64KB"));
    }

    #[test]
    fn test_second_init_rejected() {
        // Another test may have initialized first; either way the next call fails
        let _ = init(RuntimeConfig::new());
        assert!(is_initialized());
        assert_eq!(init(RuntimeConfig::new()), Err(RuntimeError::AlreadyInitialized));
        assert!(config().validate().is_ok());
    }
}
