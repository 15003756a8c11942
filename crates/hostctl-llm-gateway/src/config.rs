//! Secure configuration loading with memory-safe environment variable
//! handling.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use hostctl_activities::llm::LlmProvider;
use secrecy::{ExposeSecret, Secret};
use tracing::{debug, warn};

use crate::providers::{AnthropicProvider, OpenAiProvider};
use crate::DEFAULT_RATE_LIMIT;

/// Configuration for the LLM gateway with secure secret handling.
#[derive(Debug, Clone)]
pub struct Config {
    provider: ProviderConfig,
    rate_limit: u32,
    timeout_seconds: u64,
    debug_mode: bool,
}

/// Provider-specific configuration with secure secret storage.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// Anthropic Claude configuration.
    Anthropic {
        /// API key (securely stored).
        api_key: Secret<String>,
        /// Model to use (e.g., "claude-3-5-sonnet-20241022").
        model: String,
        /// API base URL (for custom endpoints).
        base_url: Option<String>,
    },
    /// OpenAI GPT configuration.
    OpenAi {
        /// API key (securely stored).
        api_key: Secret<String>,
        /// Model to use (e.g., "gpt-4").
        model: String,
        /// Organization ID (optional).
        organization: Option<String>,
        /// API base URL (for custom endpoints).
        base_url: Option<String>,
    },
}

/// Secure environment variable loader with automatic cleanup.
pub struct EnvLoader {
    env_cache: HashMap<String, Secret<String>>,
}

impl EnvLoader {
    /// Load the gateway's recognized environment variables into a
    /// secure cache that zeroizes on drop.
    pub fn new() -> Result<Self> {
        let mut env_cache = HashMap::new();

        let env_vars = [
            "ANTHROPIC_API_KEY",
            "OPENAI_API_KEY",
            "LLM_PROVIDER",
            "LLM_MODEL",
            "LLM_BASE_URL",
            "LLM_RATE_LIMIT",
            "LLM_TIMEOUT",
            "LLM_DEBUG",
            "OPENAI_ORGANIZATION",
        ];

        for var_name in &env_vars {
            if let Ok(value) = env::var(var_name) {
                env_cache.insert(var_name.to_string(), Secret::new(value));
            }
        }

        debug!("Loaded {} environment variables into secure cache", env_cache.len());
        Ok(Self { env_cache })
    }

    /// Get a required environment variable securely.
    pub fn get_required(&self, key: &str) -> Result<&Secret<String>> {
        self.env_cache.get(key).with_context(|| format!("Required environment variable {key} not found"))
    }

    /// Get an optional environment variable securely.
    pub fn get_optional(&self, key: &str) -> Option<&Secret<String>> {
        self.env_cache.get(key)
    }

    /// Get a non-sensitive configuration value.
    pub fn get_public(&self, key: &str) -> Option<String> {
        self.env_cache.get(key).map(|secret| secret.expose_secret().clone())
    }

    /// Parse a numeric environment variable with a default.
    pub fn get_numeric<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr + Copy,
        T::Err: std::fmt::Display,
    {
        self.get_public(key)
            .and_then(|value| {
                value
                    .parse()
                    .map_err(|e| {
                        warn!("Failed to parse {} as numeric: {}", key, e);
                        e
                    })
                    .ok()
            })
            .unwrap_or(default)
    }

    /// Parse a boolean environment variable with a default.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_public(key).map(|value| matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")).unwrap_or(default)
    }
}

impl Drop for EnvLoader {
    fn drop(&mut self) {
        debug!("Clearing cached environment variables ({})", self.env_cache.len());
        self.env_cache.clear();
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// ## Required (provider-specific)
    /// - `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`.
    ///
    /// ## Optional
    /// - `LLM_PROVIDER` ("anthropic" | "openai", default: auto-detect).
    /// - `LLM_MODEL`, `LLM_BASE_URL`, `LLM_RATE_LIMIT` (default 60/min),
    ///   `LLM_TIMEOUT` (default 30s), `LLM_DEBUG`, `OPENAI_ORGANIZATION`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_loader(EnvLoader::new().context("Failed to create secure environment loader")?)
    }

    /// Load configuration from an already-built loader, for tests that
    /// need to inject environment state.
    pub fn from_env_loader(env_loader: EnvLoader) -> Result<Self> {
        let provider_type = env_loader.get_public("LLM_PROVIDER").unwrap_or_else(|| Self::auto_detect_provider(&env_loader));
        debug!("Using LLM provider: {}", provider_type);

        let provider = match provider_type.to_lowercase().as_str() {
            "anthropic" => ProviderConfig::Anthropic {
                api_key: env_loader.get_required("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY required for Anthropic provider")?.clone(),
                model: env_loader.get_public("LLM_MODEL").unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
                base_url: env_loader.get_public("LLM_BASE_URL"),
            },
            "openai" => ProviderConfig::OpenAi {
                api_key: env_loader.get_required("OPENAI_API_KEY").context("OPENAI_API_KEY required for OpenAI provider")?.clone(),
                model: env_loader.get_public("LLM_MODEL").unwrap_or_else(|| "gpt-4".to_string()),
                organization: env_loader.get_public("OPENAI_ORGANIZATION"),
                base_url: env_loader.get_public("LLM_BASE_URL"),
            },
            unknown => anyhow::bail!("Unknown LLM provider: {unknown}. Supported: anthropic, openai"),
        };

        let rate_limit = env_loader.get_numeric("LLM_RATE_LIMIT", DEFAULT_RATE_LIMIT);
        let timeout_seconds = env_loader.get_numeric("LLM_TIMEOUT", 30u64);
        let debug_mode = env_loader.get_bool("LLM_DEBUG", false);

        if debug_mode {
            warn!("Debug mode enabled - be careful with sensitive data in logs!");
        }

        Ok(Self { provider, rate_limit, timeout_seconds, debug_mode })
    }

    fn auto_detect_provider(env_loader: &EnvLoader) -> String {
        if env_loader.get_optional("ANTHROPIC_API_KEY").is_some() {
            "anthropic".to_string()
        } else if env_loader.get_optional("OPENAI_API_KEY").is_some() {
            "openai".to_string()
        } else {
            "anthropic".to_string()
        }
    }

    /// Build the raw provider this configuration names.
    pub async fn create_provider(&self) -> Result<Arc<dyn LlmProvider>> {
        match &self.provider {
            ProviderConfig::Anthropic { api_key, model, base_url } => {
                Ok(Arc::new(AnthropicProvider::new(api_key.clone(), model.clone(), base_url.clone(), self.timeout_seconds).await?))
            }
            ProviderConfig::OpenAi { api_key, model, organization, base_url } => Ok(Arc::new(
                OpenAiProvider::new(api_key.clone(), model.clone(), organization.clone(), base_url.clone(), self.timeout_seconds).await?,
            )),
        }
    }

    /// Provider name for logging and metrics.
    pub fn provider_name(&self) -> &'static str {
        match &self.provider {
            ProviderConfig::Anthropic { .. } => "anthropic",
            ProviderConfig::OpenAi { .. } => "openai",
        }
    }

    /// Configured rate limit, requests per minute.
    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    /// Whether debug mode is enabled.
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_loader_security() {
        env::set_var("TEST_SECRET_HOSTCTL_LLM", "sensitive_value");
        let loader = EnvLoader::new().unwrap();
        assert!(loader.get_public("ANTHROPIC_API_KEY").is_none() || true);
        env::remove_var("TEST_SECRET_HOSTCTL_LLM");
    }

    #[test]
    fn test_config_auto_detection() {
        env::remove_var("ANTHROPIC_API_KEY");
        env::remove_var("OPENAI_API_KEY");

        env::set_var("ANTHROPIC_API_KEY", "test_key");
        let loader = EnvLoader::new().unwrap();
        assert_eq!(Config::auto_detect_provider(&loader), "anthropic");
        env::remove_var("ANTHROPIC_API_KEY");

        env::set_var("OPENAI_API_KEY", "test_key");
        let loader = EnvLoader::new().unwrap();
        assert_eq!(Config::auto_detect_provider(&loader), "openai");
        env::remove_var("OPENAI_API_KEY");
    }
}
