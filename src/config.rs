use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkPolicy;
use crate::search::SearchConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
            target_chars: default_target_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn policy(&self) -> ChunkPolicy {
        ChunkPolicy {
            max_chars: self.max_chars,
            min_chars: self.min_chars,
            target_chars: self.target_chars,
        }
    }
}

fn default_max_chars() -> usize {
    2000
}
fn default_min_chars() -> usize {
    200
}
fn default_target_chars() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchSettings {
    /// Semantic-search endpoint URL. Search commands fail without it.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_min_quality")]
    pub min_quality: f64,
    #[serde(default = "default_min_word_count")]
    pub min_word_count: usize,
    #[serde(default = "default_expand_context")]
    pub expand_context: bool,
    #[serde(default = "default_context_size")]
    pub context_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            target_count: default_target_count(),
            search_limit: default_search_limit(),
            min_quality: default_min_quality(),
            min_word_count: default_min_word_count(),
            expand_context: default_expand_context(),
            context_size: default_context_size(),
        }
    }
}

impl SearchSettings {
    pub fn agent_config(&self) -> SearchConfig {
        SearchConfig {
            target_count: self.target_count,
            search_limit: self.search_limit,
            min_quality: self.min_quality,
            min_word_count: self.min_word_count,
            expand_context: self.expand_context,
            context_size: self.context_size,
        }
    }
}

fn default_target_count() -> usize {
    20
}
fn default_search_limit() -> usize {
    100
}
fn default_min_quality() -> f64 {
    2.5
}
fn default_min_word_count() -> usize {
    30
}
fn default_expand_context() -> bool {
    true
}
fn default_context_size() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

fn default_window_days() -> i64 {
    7
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.min_chars == 0 {
        anyhow::bail!("chunking.min_chars must be > 0");
    }
    if config.chunking.max_chars < config.chunking.min_chars {
        anyhow::bail!("chunking.max_chars must be >= chunking.min_chars");
    }
    if config.chunking.target_chars < config.chunking.min_chars
        || config.chunking.target_chars > config.chunking.max_chars
    {
        anyhow::bail!("chunking.target_chars must lie between min_chars and max_chars");
    }

    // Validate search
    if config.search.target_count == 0 {
        anyhow::bail!("search.target_count must be >= 1");
    }
    if config.search.search_limit < config.search.target_count {
        anyhow::bail!("search.search_limit must be >= search.target_count");
    }
    if !(0.0..=5.0).contains(&config.search.min_quality) {
        anyhow::bail!("search.min_quality must be in [0.0, 5.0]");
    }

    // Validate clustering
    if config.cluster.window_days < 0 {
        anyhow::bail!("cluster.window_days must be >= 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("memoir.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(&tmp, "[db]\npath = \"graph.sqlite\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.max_chars, 2000);
        assert_eq!(config.search.target_count, 20);
        assert!(config.search.expand_context);
        assert_eq!(config.cluster.window_days, 7);
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[db]\npath = \"graph.sqlite\"\n\n[search]\nmin_quality = 7.5\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn inverted_chunk_bounds_are_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[db]\npath = \"graph.sqlite\"\n\n[chunking]\nmax_chars = 100\nmin_chars = 500\ntarget_chars = 200\n",
        );
        assert!(load_config(&path).is_err());
    }
}
