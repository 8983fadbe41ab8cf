use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Deepest allowed nesting, counted both across the parsed tree and across nested contexts.
pub const MAX_EXPRESSION_DEPTH: usize = 100;
/// Default byte budget for a memo.
pub const DEFAULT_MAX_MEMO_SIZE: usize = 1024 * 1024;
/// Error code raised when a memo grows past its budget.
pub const MEMO_TOO_LARGE_CODE: &str = "cortex.tooLarge.memo";
pub const DEFAULT_EXPRESSION_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_ACCESS_CONTEXT_CACHE_CAPACITY: usize = 10;
pub const DEFAULT_SLOW_EVALUATION_MS: u64 = 500;
pub const DEFAULT_MAX_REGEXP_LENGTH: usize = 40;

/// Engine wide tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_expression_depth: usize,
    pub max_memo_size: usize,
    pub expression_cache_capacity: usize,
    pub access_context_cache_capacity: usize,
    pub slow_evaluation_ms: u64,
    pub max_regexp_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_expression_depth: MAX_EXPRESSION_DEPTH,
            max_memo_size: DEFAULT_MAX_MEMO_SIZE,
            expression_cache_capacity: DEFAULT_EXPRESSION_CACHE_CAPACITY,
            access_context_cache_capacity: DEFAULT_ACCESS_CONTEXT_CACHE_CAPACITY,
            slow_evaluation_ms: DEFAULT_SLOW_EVALUATION_MS,
            max_regexp_length: DEFAULT_MAX_REGEXP_LENGTH,
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str::<EngineConfig>(s)?)
    }

    /// Loads configuration with precedence defaults, then the first config file found, then env.
    ///
    /// Files are looked up at `explicit`, `$NEXUS_EXPR_CONFIG`, then `./nexus-expr.toml`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = EngineConfig::default();
        for p in config_paths(explicit) {
            if p.exists() {
                let s = std::fs::read_to_string(&p)?;
                cfg = Self::from_toml_str(&s)?;
                log::info!("loaded engine config from {}", p.display());
                break;
            }
        }
        cfg.apply_env();
        Ok(cfg)
    }

    /// Applies `NEXUS_EXPR_*` overrides; unparsable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_usize("NEXUS_EXPR_MAX_DEPTH") {
            self.max_expression_depth = v;
        }
        if let Some(v) = env_usize("NEXUS_EXPR_MAX_MEMO_SIZE") {
            self.max_memo_size = v;
        }
        if let Some(v) = env_usize("NEXUS_EXPR_CACHE_CAPACITY") {
            self.expression_cache_capacity = v;
        }
        if let Some(v) = env_usize("NEXUS_EXPR_SLOW_MS") {
            self.slow_evaluation_ms = crate::utils::num::usize_to_u64(v);
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {key}={raw}: not an unsigned integer");
            None
        }
    }
}

fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = vec![];
    if let Some(p) = explicit {
        paths.push(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("NEXUS_EXPR_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join("nexus-expr.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = EngineConfig::from_toml_str("max_expression_depth = 12\n").unwrap();
        assert_eq!(cfg.max_expression_depth, 12);
        assert_eq!(cfg.max_memo_size, DEFAULT_MAX_MEMO_SIZE);
        assert_eq!(cfg.access_context_cache_capacity, 10);
    }

    #[test]
    fn bad_toml_is_an_error() {
        let err = EngineConfig::from_toml_str("max_expression_depth = \"deep\"").unwrap_err();
        assert_eq!(err.code(), "invalidArgument.config");
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("engine.toml");
        std::fs::write(&p, "slow_evaluation_ms = 5\nmax_regexp_length = 8\n").unwrap();
        let cfg = EngineConfig::load(Some(&p)).unwrap();
        assert_eq!(cfg.max_regexp_length, 8);
    }
}
