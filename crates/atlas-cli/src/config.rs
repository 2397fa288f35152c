//! `atlas.toml` configuration and database path resolution.
//!
//! Lookup order for the config file: `--config`, `$ATLAS_CONFIG`, then
//! `~/.memory-atlas/atlas.toml` if it exists. For the database: `--db`,
//! `$ATLAS_DB`, `db_path` from the config, then `~/.memory-atlas/memory.db`.

use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use atlas_core::{InferenceOptions, LayoutOptions};

const CONFIG_DIR: &str = ".memory-atlas";
const CONFIG_FILE: &str = "atlas.toml";
const DEFAULT_DB_FILE: &str = "memory.db";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub min_shared_memories: usize,
    pub max_edges: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let defaults = InferenceOptions::default();
        Self {
            min_shared_memories: defaults.min_shared_memories,
            max_edges: defaults.max_edges,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub db_path: Option<PathBuf>,
    /// Address `atlas serve` listens on.
    pub bind: String,
    pub projection_ttl_secs: u64,
    pub poll_interval_secs: u64,
    pub warmup_ticks: usize,
    pub inference: InferenceConfig,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            bind: "127.0.0.1:4317".to_string(),
            projection_ttl_secs: 300,
            poll_interval_secs: 5,
            warmup_ticks: LayoutOptions::default().warmup_ticks,
            inference: InferenceConfig::default(),
        }
    }
}

/// `$HOME` (or `%USERPROFILE%`), falling back to the working directory.
pub fn home_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

impl AtlasConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse atlas config")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Load using the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = env::var_os("ATLAS_CONFIG").map(PathBuf::from);
        Self::load_from(explicit, from_env.as_deref(), &home_dir())
    }

    /// An explicit or `$ATLAS_CONFIG` path must exist; the home default is
    /// optional.
    pub fn load_from(explicit: Option<&Path>, from_env: Option<&Path>, home: &Path) -> Result<Self> {
        if let Some(path) = explicit.or(from_env) {
            tracing::debug!(path = %path.display(), "loading config");
            return Self::from_file(path);
        }
        let default = home.join(CONFIG_DIR).join(CONFIG_FILE);
        if default.is_file() {
            tracing::debug!(path = %default.display(), "loading config");
            return Self::from_file(&default);
        }
        Ok(Self::default())
    }

    pub fn resolve_db(&self, cli: Option<&Path>) -> PathBuf {
        let from_env = env::var_os("ATLAS_DB").map(PathBuf::from);
        self.resolve_db_from(cli, from_env.as_deref(), &home_dir())
    }

    pub fn resolve_db_from(&self, cli: Option<&Path>, from_env: Option<&Path>, home: &Path) -> PathBuf {
        cli.or(from_env)
            .or(self.db_path.as_deref())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join(CONFIG_DIR).join(DEFAULT_DB_FILE))
    }

    pub fn inference_options(&self) -> InferenceOptions {
        InferenceOptions {
            min_shared_memories: self.inference.min_shared_memories,
            max_edges: self.inference.max_edges,
            ..InferenceOptions::default()
        }
    }

    pub fn layout_options(&self) -> LayoutOptions {
        LayoutOptions {
            warmup_ticks: self.warmup_ticks,
            ..LayoutOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AtlasConfig::from_toml(
            r#"
            bind = "0.0.0.0:9000"

            [inference]
            max_edges = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.inference.max_edges, 10);
        assert_eq!(config.inference.min_shared_memories, 2);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.inference_options().max_edges, 10);
        assert!(config.inference_options().demote_hub);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(AtlasConfig::from_toml("bind = [").is_err());
        assert!(AtlasConfig::from_toml("poll_interval_secs = \"soon\"").is_err());
    }

    #[test]
    fn test_lookup_order() {
        let home = TempDir::new().unwrap();
        assert_eq!(
            AtlasConfig::load_from(None, None, home.path()).unwrap(),
            AtlasConfig::default()
        );

        let dir = home.path().join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CONFIG_FILE), "warmup_ticks = 7").unwrap();
        assert_eq!(
            AtlasConfig::load_from(None, None, home.path()).unwrap().warmup_ticks,
            7
        );

        let explicit = home.path().join("other.toml");
        fs::write(&explicit, "warmup_ticks = 9").unwrap();
        let loaded = AtlasConfig::load_from(Some(&explicit), None, home.path()).unwrap();
        assert_eq!(loaded.warmup_ticks, 9);
        assert_eq!(loaded.layout_options().warmup_ticks, 9);

        let missing = home.path().join("missing.toml");
        assert!(AtlasConfig::load_from(None, Some(&missing), home.path()).is_err());
    }

    #[test]
    fn test_db_precedence() {
        let home = Path::new("/home/test");
        let mut config = AtlasConfig::default();
        assert_eq!(
            config.resolve_db_from(None, None, home),
            PathBuf::from("/home/test/.memory-atlas/memory.db")
        );
        config.db_path = Some(PathBuf::from("/data/config.db"));
        assert_eq!(config.resolve_db_from(None, None, home), PathBuf::from("/data/config.db"));
        assert_eq!(
            config.resolve_db_from(None, Some(Path::new("/data/env.db")), home),
            PathBuf::from("/data/env.db")
        );
        assert_eq!(
            config.resolve_db_from(
                Some(Path::new("/data/cli.db")),
                Some(Path::new("/data/env.db")),
                home
            ),
            PathBuf::from("/data/cli.db")
        );
    }
}
