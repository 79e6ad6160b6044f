use anyhow::{Result, Context as AnyhowContext, ensure};
use serde::{Serialize, Deserialize};
use std::fs;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/api/langchain/req_ui_component";

/// 全局配置 (YAML)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 同时运行的生成请求上限
    pub max_permits: usize,
    /// Buffer size of each direction of the worker channel.
    pub channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_permits: 5,
            channel_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub endpoint: String,
    /// HTTP client timeout; the scheduler itself never times a request out.
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_permits > 0, "scheduler.max_permits must be at least 1");
        ensure!(self.channel_capacity > 0, "scheduler.channel_capacity must be at least 1");
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        ensure!(!self.generator.endpoint.is_empty(), "generator.endpoint must not be empty");
        Ok(())
    }
}

pub fn load_config_from_yaml(file_path: &str) -> Result<Config> {
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read config file from {}", file_path))?;

    let config: Config = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize config from {}", file_path))?;

    config.validate()?;
    Ok(config)
}
