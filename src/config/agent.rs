//! Agent configuration loaded from a TOML file
//!
//! Defines the generation backend, the knowledge source and the
//! conversation policy knobs. Every section has defaults, so a minimal file
//! only needs to name the store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub store: StoreInfo,

    /// LLM provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Knowledge base configuration
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Prompt book and turn policy
    #[serde(default)]
    pub conversation: ConversationConfig,
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.knowledge.top_k == 0 {
            return Err(ConfigError::Validation("knowledge.top_k must be at least 1".into()));
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::Validation("llm.max_tokens must be at least 1".into()));
        }
        Ok(())
    }
}

/// Store identification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
}

impl Default for StoreInfo {
    fn default() -> Self {
        Self {
            name: "Burger Counter".to_string(),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "ollama", "openai", "local"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API key environment variable name (for cloud providers)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Custom API endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Output cap for customer-facing replies
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "gemma3:4b".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: None,
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Knowledge base configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// JSON document file
    #[serde(default = "default_knowledge_path")]
    pub path: PathBuf,

    /// Passages retrieved per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_knowledge_path() -> PathBuf {
    PathBuf::from("data/knowledge.json")
}

fn default_top_k() -> usize {
    3
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: default_knowledge_path(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Prompt book TOML file; startup fails if it is missing
    #[serde(default = "default_prompts_path")]
    pub prompts_path: PathBuf,

    /// User turns below which a complaint gets clarifying questions
    #[serde(default = "default_complaint_clarify_turns")]
    pub complaint_clarify_turns: usize,
}

fn default_prompts_path() -> PathBuf {
    PathBuf::from("configs/prompts.toml")
}

fn default_complaint_clarify_turns() -> usize {
    2
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            prompts_path: default_prompts_path(),
            complaint_clarify_turns: default_complaint_clarify_turns(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[store]
name = "Gemma Burger"

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
max_tokens = 200

[knowledge]
path = "data/store.json"
top_k = 5

[conversation]
prompts_path = "configs/store_prompts.toml"
complaint_clarify_turns = 3
"#;

    #[test]
    fn test_parse_config() {
        let config = AgentConfig::from_toml(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.store.name, "Gemma Burger");
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.api_key_env, Some("OPENAI_API_KEY".to_string()));
        assert_eq!(config.llm.max_tokens, 200);
        assert_eq!(config.llm.timeout_secs, 120); // Default
        assert_eq!(config.knowledge.top_k, 5);
        assert_eq!(config.conversation.complaint_clarify_turns, 3);
    }

    #[test]
    fn test_minimal_config() {
        let config = AgentConfig::from_toml("").unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.knowledge.top_k, 3);
        assert_eq!(config.conversation.complaint_clarify_turns, 2);
        assert_eq!(config.conversation.prompts_path, PathBuf::from("configs/prompts.toml"));
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let err = AgentConfig::from_toml("[knowledge]\ntop_k = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
