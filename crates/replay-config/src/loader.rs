//! Layered configuration loading

use crate::table::{CheckpointConfig, TableConfig};
use crate::{ConfigError, Result};
use replay_core::{ChunkStore, Table};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Top-level configuration of the hosting server process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the wire service listens on
    pub port: u16,
    /// Checkpoint schedule
    pub checkpoint: CheckpointConfig,
    /// Tables to create at startup
    pub tables: Vec<TableConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            checkpoint: CheckpointConfig::default(),
            tables: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Validate every table configuration
    pub fn validate(&self) -> Result<()> {
        for (i, table) in self.tables.iter().enumerate() {
            table.validate()?;
            if self.tables[..i].iter().any(|other| other.name == table.name) {
                return Err(ConfigError::InvalidValue {
                    field: format!("tables[{i}].name"),
                    message: format!("duplicate table name {}", table.name),
                });
            }
        }
        Ok(())
    }

    /// Build every configured table against one shared chunk store
    pub fn build_tables(&self, store: &Arc<ChunkStore>) -> Result<Vec<Table>> {
        self.validate()?;
        self.tables
            .iter()
            .map(|table| table.build(Arc::clone(store)))
            .collect()
    }
}

/// Configuration loader layering defaults, environment and files
pub struct ConfigLoader {
    files: Vec<PathBuf>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a loader with only defaults
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            env_prefix: None,
        }
    }

    /// Add a TOML file source; later files win
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// Add environment variable overrides with the given prefix
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self
    }

    /// Load and validate configuration from all sources
    ///
    /// Files layer over the defaults; environment overrides apply last
    /// and win over both.
    pub fn load(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::default();

        for path in &self.files {
            let content = std::fs::read_to_string(path)?;
            config = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            debug!(file = %path.display(), "Loaded configuration file");
        }

        if let Some(prefix) = &self.env_prefix {
            config = Self::apply_env_overrides(config, prefix)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML string
    pub fn load_from_str(content: &str) -> Result<ServerConfig> {
        let config: ServerConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(mut config: ServerConfig, prefix: &str) -> Result<ServerConfig> {
        if let Ok(val) = std::env::var(format!("{prefix}_PORT")) {
            config.port = val
                .parse()
                .map_err(|_| ConfigError::EnvVar(format!("invalid port value: {val}")))?;
        }
        if let Ok(val) = std::env::var(format!("{prefix}_CHECKPOINT_ROOT")) {
            config.checkpoint.root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var(format!("{prefix}_CHECKPOINT_INTERVAL_SECS")) {
            config.checkpoint.interval_secs = val.parse().map_err(|_| {
                ConfigError::EnvVar(format!("invalid interval_secs value: {val}"))
            })?;
        }
        if let Ok(val) = std::env::var(format!("{prefix}_CHECKPOINT_KEEP")) {
            config.checkpoint.keep = val
                .parse()
                .map_err(|_| ConfigError::EnvVar(format!("invalid keep value: {val}")))?;
        }
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SelectorConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.port, 8000);
        assert!(config.tables.is_empty());
        assert_eq!(config.checkpoint.keep, 3);
    }

    #[test]
    fn test_load_from_str() {
        let toml = r#"
            port = 9100

            [checkpoint]
            root = "/var/lib/replay/checkpoints"
            interval_secs = 300
            keep = 5

            [[tables]]
            name = "experience"
            max_size = 100000

            [tables.sampler]
            kind = "prioritized"
            priority_exponent = 0.8

            [tables.rate_limiter]
            samples_per_insert = 4.0
            min_size_to_sample = 1000
            min_diff = -1000.0
            max_diff = 1000.0

            [[tables]]
            name = "eval"
            max_size = 500
            max_times_sampled = 1

            [tables.sampler]
            kind = "fifo"
        "#;
        let config = ConfigLoader::load_from_str(toml).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.checkpoint.interval_secs, 300);
        assert_eq!(config.tables.len(), 2);
        assert_eq!(
            config.tables[0].sampler,
            SelectorConfig::Prioritized {
                priority_exponent: 0.8
            }
        );
        assert_eq!(config.tables[0].rate_limiter.samples_per_insert, 4.0);
        assert_eq!(config.tables[1].max_times_sampled, 1);
        // Unspecified remover defaults to FIFO.
        assert_eq!(config.tables[1].remover, SelectorConfig::Fifo);
    }

    #[test]
    fn test_duplicate_table_names_rejected() {
        let toml = r#"
            [[tables]]
            name = "dup"
            max_size = 10

            [[tables]]
            name = "dup"
            max_size = 20
        "#;
        assert!(ConfigLoader::load_from_str(toml).is_err());
    }

    #[test]
    fn test_invalid_table_rejected() {
        let toml = r#"
            [[tables]]
            name = "bad"
            max_size = 0
        "#;
        assert!(ConfigLoader::load_from_str(toml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            port = 7700

            [[tables]]
            name = "from-file"
            max_size = 100
            "#
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).load().unwrap();
        assert_eq!(config.port, 7700);
        assert_eq!(config.tables[0].name, "from-file");
    }

    #[test]
    fn test_missing_file_errors() {
        let loader = ConfigLoader::new().with_file("/nonexistent/replay.toml");
        assert!(loader.load().is_err());
    }

    #[test]
    fn test_env_override_port() {
        unsafe {
            std::env::set_var("RPLPORT_PORT", "6123");
        }
        let config = ConfigLoader::new()
            .with_env_prefix("RPLPORT")
            .load()
            .unwrap();
        assert_eq!(config.port, 6123);
        unsafe {
            std::env::remove_var("RPLPORT_PORT");
        }
    }

    #[test]
    fn test_env_override_invalid_port() {
        unsafe {
            std::env::set_var("RPLBAD_PORT", "not-a-port");
        }
        let result = ConfigLoader::new().with_env_prefix("RPLBAD").load();
        assert!(result.is_err());
        unsafe {
            std::env::remove_var("RPLBAD_PORT");
        }
    }

    #[test]
    fn test_env_overrides_file() {
        // Use unique prefix to avoid parallel test interference
        unsafe {
            std::env::set_var("ENVWINS_PORT", "6200");
        }

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            port = 6100

            [[tables]]
            name = "layered"
            max_size = 10
            "#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_file(file.path())
            .with_env_prefix("ENVWINS")
            .load()
            .unwrap();

        // Env wins over the file; the file still supplies the tables.
        assert_eq!(config.port, 6200);
        assert_eq!(config.tables[0].name, "layered");
        unsafe {
            std::env::remove_var("ENVWINS_PORT");
        }
    }

    #[test]
    fn test_build_tables_from_config() {
        let toml = r#"
            [[tables]]
            name = "built-a"
            max_size = 10

            [[tables]]
            name = "built-b"
            max_size = 5
            max_times_sampled = 1

            [tables.sampler]
            kind = "fifo"
        "#;
        let config = ConfigLoader::load_from_str(toml).unwrap();
        let store = Arc::new(ChunkStore::new());
        let tables = config.build_tables(&store).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name(), "built-a");
        assert_eq!(tables[1].info().max_times_sampled, 1);
    }
}
