use std::path::PathBuf;

use delve_tools::sandbox::{Sandbox, default_sandbox_deny_patterns};
use delve_tools::{DEFAULT_MAX_TOOL_OUTPUT_BYTES, ToolError, ToolSettings};

use crate::{DelveConfig, expand_env_vars};

/// Turn an optional config into runtime tool settings.
///
/// An invalid `[tools.sandbox]` section is logged and replaced by the default
/// sandbox (current directory, default deny globs). Only a failure to build
/// that default is returned as an error.
pub fn build_tool_settings(config: Option<&DelveConfig>) -> Result<ToolSettings, ToolError> {
    let tools_cfg = config.and_then(|cfg| cfg.tools.as_ref());

    let grep = tools_cfg
        .and_then(|cfg| cfg.grep.as_ref())
        .map(delve_tools::config::GrepConfig::resolve)
        .unwrap_or_default();

    let max_output_bytes = tools_cfg
        .and_then(|cfg| cfg.output.as_ref())
        .and_then(|cfg| cfg.max_bytes)
        .filter(|bytes| *bytes > 0)
        .unwrap_or(DEFAULT_MAX_TOOL_OUTPUT_BYTES);

    let sandbox_cfg = tools_cfg.and_then(|cfg| cfg.sandbox.as_ref());
    let include_default_denies = sandbox_cfg.is_none_or(|cfg| cfg.include_default_denies);
    let mut denied_patterns = sandbox_cfg
        .map(|cfg| cfg.denied_patterns.clone())
        .unwrap_or_default();
    if include_default_denies {
        denied_patterns.extend(default_sandbox_deny_patterns());
    }

    let mut allowed_roots: Vec<PathBuf> = sandbox_cfg
        .map(|cfg| cfg.allowed_roots.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|raw| PathBuf::from(expand_env_vars(&raw)))
        .collect();
    if allowed_roots.is_empty() {
        allowed_roots.push(PathBuf::from("."));
    }
    let allow_absolute = sandbox_cfg.is_some_and(|cfg| cfg.allow_absolute);

    let sandbox = match Sandbox::new(allowed_roots, denied_patterns, allow_absolute) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            tracing::warn!("Invalid sandbox config: {e}. Using defaults.");
            Sandbox::new(
                vec![PathBuf::from(".")],
                default_sandbox_deny_patterns(),
                false,
            )?
        }
    };

    Ok(ToolSettings {
        grep,
        max_output_bytes,
        sandbox,
    })
}

#[cfg(test)]
mod tests {
    use super::build_tool_settings;
    use crate::DelveConfig;
    use delve_tools::{DEFAULT_MAX_TOOL_OUTPUT_BYTES, GrepToolConfig};
    use std::path::Path;
    use tempfile::tempdir;

    fn parse(raw: &str) -> DelveConfig {
        toml::from_str(raw).unwrap()
    }

    #[test]
    fn no_config_uses_defaults() {
        let settings = build_tool_settings(None).unwrap();
        assert_eq!(settings.grep, GrepToolConfig::default());
        assert_eq!(settings.max_output_bytes, DEFAULT_MAX_TOOL_OUTPUT_BYTES);
        let cwd = std::fs::canonicalize(".").unwrap();
        assert_eq!(settings.sandbox.allowed_roots(), &[cwd]);
        assert!(settings.sandbox.is_path_denied(Path::new("/repo/.env")));
    }

    #[test]
    fn grep_and_output_sections_apply() {
        let config = parse(
            "[tools.output]\nmax_bytes = 2048\n\n[tools.grep]\nmax_matches = 20\ncache_enabled = false\n",
        );
        let settings = build_tool_settings(Some(&config)).unwrap();
        assert_eq!(settings.max_output_bytes, 2048);
        assert_eq!(settings.grep.max_matches, 20);
        assert!(!settings.grep.cache_enabled);
        assert_eq!(settings.grep.worker_pool_size, 10);
    }

    #[test]
    fn allowed_roots_expand_env_vars() {
        let dir = tempdir().unwrap();
        unsafe {
            std::env::set_var("DELVE_TEST_ROOT", dir.path());
        }
        let config = parse("[tools.sandbox]\nallowed_roots = [\"${DELVE_TEST_ROOT}\"]\n");
        let settings = build_tool_settings(Some(&config)).unwrap();
        unsafe {
            std::env::remove_var("DELVE_TEST_ROOT");
        }
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(settings.sandbox.allowed_roots(), &[expected]);
    }

    #[test]
    fn default_denies_can_be_disabled() {
        let config = parse(
            "[tools.sandbox]\ninclude_default_denies = false\ndenied_patterns = [\"**/*.secret\"]\n",
        );
        let settings = build_tool_settings(Some(&config)).unwrap();
        assert!(!settings.sandbox.is_path_denied(Path::new("/repo/.env")));
        assert!(settings.sandbox.is_path_denied(Path::new("/repo/db.secret")));
    }

    #[test]
    fn invalid_sandbox_falls_back_to_defaults() {
        let config = parse("[tools.sandbox]\ndenied_patterns = [\"a[\"]\n");
        let settings = build_tool_settings(Some(&config)).unwrap();
        let cwd = std::fs::canonicalize(".").unwrap();
        assert_eq!(settings.sandbox.allowed_roots(), &[cwd]);
        assert!(settings.sandbox.is_path_denied(Path::new("/repo/id_rsa")));
    }
}
