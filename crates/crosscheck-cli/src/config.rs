//! Run configuration loaded from `crosscheck.toml`.
//!
//! Command-line flags win over config values; config values win over the
//! built-in defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crosscheck::{EngineConfig, EngineKind};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub engines: EnginesConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunConfig {
    /// Worker-pool width inside one statement group.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Case names to skip.
    #[serde(default)]
    pub skip: Vec<String>,

    /// Per-statement timeout in seconds (0 = no limit).
    #[serde(default)]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnginesConfig {
    #[serde(default)]
    pub reference: Option<EngineEntry>,

    #[serde(default)]
    pub candidate: Option<EngineEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineEntry {
    /// Display name; defaults to the kind.
    #[serde(default)]
    pub name: Option<String>,

    /// Invocation template: "bendsql" or "snowsql".
    pub kind: String,

    /// Executable override.
    #[serde(default)]
    pub program: Option<String>,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub warehouse: Option<String>,
}

impl Config {
    /// Load from a TOML file. A missing file is not an error: defaults apply.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("could not parse config file {}", path.display()))
    }
}

impl EngineEntry {
    /// Turn a config entry into an [`EngineConfig`], applying overrides.
    pub fn to_engine_config(
        &self,
        database_override: Option<&str>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<EngineConfig> {
        let kind = match self.kind.as_str() {
            "bendsql" => EngineKind::Bendsql,
            "snowsql" => EngineKind::Snowsql,
            other => anyhow::bail!("unknown engine kind `{other}` (expected bendsql or snowsql)"),
        };
        let database = database_override
            .map(str::to_string)
            .or_else(|| self.database.clone())
            .context("no database configured: pass --database or set engines.*.database")?;
        let mut config = EngineConfig::new(
            self.name.clone().unwrap_or_else(|| self.kind.clone()),
            kind,
            database,
        );
        config.program = self.program.clone();
        config.warehouse = self.warehouse.clone();
        config.timeout = timeout;
        Ok(config)
    }
}
