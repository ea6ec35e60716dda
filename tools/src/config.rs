//! Configuration types consumed by tool executors.
//!
//! They live here rather than in `delve-config` so the config crate can
//! depend on the tools crate and not the other way round.

use std::time::Duration;

use serde::Deserialize;

use crate::grep::GrepToolConfig;

/// Serde helper for fields that default to `true`.
#[must_use]
pub const fn default_true() -> bool {
    true
}

/// Grep tuning.
///
/// ```toml
/// [tools.grep]
/// max_matches = 500
/// worker_pool_size = 10
/// compile_timeout_ms = 5000
/// cache_enabled = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrepConfig {
    pub max_matches: Option<usize>,
    pub max_file_size_bytes: Option<u64>,
    pub max_line_chars: Option<usize>,
    pub worker_pool_size: Option<usize>,
    pub compile_timeout_ms: Option<u64>,
    pub regex_size_limit_bytes: Option<usize>,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    pub cache_max_entries: Option<usize>,
    pub cache_ttl_seconds: Option<u64>,
}

impl Default for GrepConfig {
    fn default() -> Self {
        Self {
            max_matches: None,
            max_file_size_bytes: None,
            max_line_chars: None,
            worker_pool_size: None,
            compile_timeout_ms: None,
            regex_size_limit_bytes: None,
            cache_enabled: true,
            cache_max_entries: None,
            cache_ttl_seconds: None,
        }
    }
}

impl GrepConfig {
    /// Overlay configured values on the built-in defaults.
    ///
    /// Zero is not a usable pool size, match cap or timeout, so those fall back
    /// to the default as well.
    #[must_use]
    pub fn resolve(&self) -> GrepToolConfig {
        let defaults = GrepToolConfig::default();
        GrepToolConfig {
            max_matches: non_zero(self.max_matches).unwrap_or(defaults.max_matches),
            max_file_size_bytes: non_zero(self.max_file_size_bytes)
                .unwrap_or(defaults.max_file_size_bytes),
            max_line_chars: non_zero(self.max_line_chars).unwrap_or(defaults.max_line_chars),
            worker_pool_size: non_zero(self.worker_pool_size).unwrap_or(defaults.worker_pool_size),
            compile_timeout: non_zero(self.compile_timeout_ms)
                .map_or(defaults.compile_timeout, Duration::from_millis),
            regex_size_limit_bytes: non_zero(self.regex_size_limit_bytes)
                .unwrap_or(defaults.regex_size_limit_bytes),
            cache_enabled: self.cache_enabled,
            cache_max_entries: self.cache_max_entries.unwrap_or(defaults.cache_max_entries),
            cache_ttl: self
                .cache_ttl_seconds
                .map_or(defaults.cache_ttl, Duration::from_secs),
        }
    }
}

fn non_zero<T: Default + PartialEq>(value: Option<T>) -> Option<T> {
    value.filter(|v| *v != T::default())
}

#[cfg(test)]
mod tests {
    use super::GrepConfig;
    use std::time::Duration;

    #[test]
    fn empty_section_resolves_to_defaults() {
        let cfg: GrepConfig = toml::from_str("").unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.max_matches, 500);
        assert_eq!(resolved.worker_pool_size, 10);
        assert_eq!(resolved.compile_timeout, Duration::from_secs(5));
        assert!(resolved.cache_enabled);
    }

    #[test]
    fn zero_values_fall_back() {
        let cfg: GrepConfig =
            toml::from_str("worker_pool_size = 0\nmax_matches = 0\ncompile_timeout_ms = 0").unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.worker_pool_size, 10);
        assert_eq!(resolved.max_matches, 500);
        assert_eq!(resolved.compile_timeout, Duration::from_secs(5));
    }

    #[test]
    fn overrides_apply() {
        let cfg: GrepConfig = toml::from_str(
            "max_matches = 50\ncache_enabled = false\ncache_ttl_seconds = 10\nmax_line_chars = 80",
        )
        .unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.max_matches, 50);
        assert!(!resolved.cache_enabled);
        assert_eq!(resolved.cache_ttl, Duration::from_secs(10));
        assert_eq!(resolved.max_line_chars, 80);
    }
}
