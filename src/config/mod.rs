//! Application configuration

pub mod agent;
pub mod prompts;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use agent::{AgentConfig, ConfigError, LlmConfig};
pub use prompts::PromptBook;

/// Process-level settings read from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Agent TOML file
    pub agent_config: PathBuf,
    /// Directory for the session database
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            agent_config: env::var("AGENT_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("configs/agent.toml")),
            data_dir: env::var("AGENT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
        })
    }

    /// Load the agent file, or defaults when it does not exist
    pub fn load_agent(&self) -> Result<AgentConfig, ConfigError> {
        if !self.agent_config.exists() {
            tracing::warn!(
                path = %self.agent_config.display(),
                "Agent config not found, using defaults"
            );
            return Ok(AgentConfig::default());
        }
        AgentConfig::from_file(&self.agent_config)
    }
}
