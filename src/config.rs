use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    // Trigger policy
    #[serde(default = "default_wake_phrase")]
    pub wake_phrase: String,
    /// "active" (always listen) or "wake_word" (passive).
    #[serde(default = "default_interaction_mode")]
    pub interaction_mode: String,

    // Scheduler cadence
    #[serde(default = "default_tick_floor_ms")]
    pub tick_floor_ms: u64,
    #[serde(default = "default_error_cooldown_ms")]
    pub error_cooldown_ms: u64,

    // Completion engine bounds
    #[serde(default = "default_max_request_attempts")]
    pub max_request_attempts: u32,
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: u32,

    // Persistence
    #[serde(default = "default_retention_window")]
    pub retention_window: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,

    // Scene exit phrases
    #[serde(default = "default_briefing_exit_phrase")]
    pub briefing_exit_phrase: String,
    #[serde(default = "default_finale_exit_phrase")]
    pub finale_exit_phrase: String,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_wake_phrase() -> String {
    "emcee".to_string()
}

fn default_interaction_mode() -> String {
    "wake_word".to_string()
}

fn default_tick_floor_ms() -> u64 {
    100
}

fn default_error_cooldown_ms() -> u64 {
    1000
}

fn default_max_request_attempts() -> u32 {
    3
}

fn default_max_chain_depth() -> u32 {
    8
}

fn default_retention_window() -> usize {
    350
}

fn default_data_dir() -> String {
    "emcee_data".to_string()
}

fn default_prompts_dir() -> String {
    "prompts".to_string()
}

fn default_briefing_exit_phrase() -> String {
    "let the game begin".to_string()
}

fn default_finale_exit_phrase() -> String {
    "farewell".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            wake_phrase: default_wake_phrase(),
            interaction_mode: default_interaction_mode(),
            tick_floor_ms: default_tick_floor_ms(),
            error_cooldown_ms: default_error_cooldown_ms(),
            max_request_attempts: default_max_request_attempts(),
            max_chain_depth: default_max_chain_depth(),
            retention_window: default_retention_window(),
            data_dir: default_data_dir(),
            prompts_dir: default_prompts_dir(),
            briefing_exit_phrase: default_briefing_exit_phrase(),
            finale_exit_phrase: default_finale_exit_phrase(),
        }
    }
}

impl OrchestratorConfig {
    /// Get the directory containing the executable.
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Path to the config file (relative to the executable).
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("emcee_config.toml")
    }

    /// Load the config file, or create it with defaults if absent.
    pub fn load() -> Self {
        let path = Self::config_path();
        match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Config {:?} is invalid ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {:?}, writing defaults", path);
                let config = Self::default();
                if let Err(e) = config.save(&path) {
                    tracing::warn!("Failed to write default config: {:#}", e);
                }
                config
            }
        }
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, raw).with_context(|| format!("failed to write config {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_cadence() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.tick_floor_ms, 100);
        assert_eq!(config.error_cooldown_ms, 1000);
        assert_eq!(config.max_request_attempts, 3);
    }

    #[test]
    fn partial_toml_is_filled_with_defaults() {
        let config: OrchestratorConfig =
            toml::from_str("wake_phrase = \"potatoes\"\ninteraction_mode = \"active\"").unwrap();
        assert_eq!(config.wake_phrase, "potatoes");
        assert_eq!(config.interaction_mode, "active");
        assert_eq!(config.retention_window, 350);
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let config = OrchestratorConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let back: OrchestratorConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.llm_model, config.llm_model);
        assert_eq!(back.wake_phrase, config.wake_phrase);
    }
}
