//! Environment variable helpers
//!
//! Every runtime knob has a `TETHER_*` override read through these.
//!
//! ```ignore
//! use tether_core::env::{env_get, env_get_bool};
//!
//! let stack: usize = env_get("TETHER_STACK_SIZE", 2 * 1024 * 1024);
//! let embedded = env_get_bool("TETHER_EMBEDDED", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T`; `None` when unset or unparsable
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" (any case) are true, anything
/// else set is false, unset is `default`
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Raw string value or `default`
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Millisecond count as a `Duration`
#[inline]
pub fn env_get_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

/// Is `key` set at all (even to an empty string)?
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns its variable names; tests run in parallel.

    #[test]
    fn test_unset_defaults() {
        let key = "__TETHER_TEST_UNSET__";
        assert_eq!(env_get::<usize>(key, 42), 42);
        assert!(env_get_bool(key, true));
        assert_eq!(env_get_opt::<u32>(key), None);
        assert_eq!(env_get_str(key, "hello"), "hello");
        assert_eq!(env_get_millis(key, 250), Duration::from_millis(250));
        assert!(!env_is_set(key));
    }

    #[test]
    fn test_parse_and_trim() {
        std::env::set_var("__TETHER_TEST_NUM__", " 123 ");
        assert_eq!(env_get::<usize>("__TETHER_TEST_NUM__", 0), 123);
        assert!(env_is_set("__TETHER_TEST_NUM__"));
        std::env::remove_var("__TETHER_TEST_NUM__");
    }

    #[test]
    fn test_invalid_falls_back() {
        std::env::set_var("__TETHER_TEST_BAD__", "not_a_number");
        assert_eq!(env_get::<usize>("__TETHER_TEST_BAD__", 99), 99);
        std::env::remove_var("__TETHER_TEST_BAD__");
    }

    #[test]
    fn test_bool_variants() {
        let key = "__TETHER_TEST_BOOL__";
        for truthy in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var(key, truthy);
            assert!(env_get_bool(key, false), "{truthy}");
        }
        for falsy in ["0", "false", "garbage"] {
            std::env::set_var(key, falsy);
            assert!(!env_get_bool(key, true), "{falsy}");
        }
        std::env::remove_var(key);
    }
}
