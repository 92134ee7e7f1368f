mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, ensure};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            (1..=100).contains(&self.retrieval.top_k),
            "retrieval.top_k must be between 1 and 100, got {}",
            self.retrieval.top_k
        );
        ensure!(
            (0.0..=1.0).contains(&self.cache.threshold),
            "cache.threshold must be between 0.0 and 1.0, got {}",
            self.cache.threshold
        );
        ensure!(
            (0.0..=1.0).contains(&self.cache.min_lexical_overlap),
            "cache.min_lexical_overlap must be between 0.0 and 1.0, got {}",
            self.cache.min_lexical_overlap
        );
        ensure!(
            self.embedding.cache_size >= 1,
            "embedding.cache_size must be at least 1"
        );
        ensure!(
            (0.0..=2.0).contains(&self.generation.temperature),
            "generation.temperature must be between 0.0 and 2.0, got {}",
            self.generation.temperature
        );
        ensure!(
            self.generation.max_tokens > 0,
            "generation.max_tokens must be positive"
        );
        ensure!(
            self.graph.max_hops <= 4,
            "graph.max_hops must be at most 4, got {}",
            self.graph.max_hops
        );
        self.chunker.validate().context("invalid [chunker] section")?;
        Ok(())
    }
}
