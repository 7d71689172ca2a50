//! Application configuration
//!
//! Configuration is read from the process environment, optionally seeded
//! from a `.env` file via `dotenvy`. Default values live in [`defaults`].
//! Missing credentials are not an error at load time; the operation that
//! needs a credential reports which variable is absent.

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use defaults::*;

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub figma: FigmaConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub output: OutputConfig,
    pub mcp: McpConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigmaConfig {
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub api_url: String,
    pub timeout_secs: u64,
}

/// LLM gateway settings (provider URL, key, model names)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub vision_model: String,
    /// Cheaper model retried once when the primary hits a quota error
    pub fallback_model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub referer: String,
    pub title: String,
    pub prompt_token_budget: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub workspace_root: PathBuf,
    pub plans_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Backend URL the bridge client talks to
    pub backend_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_GATEWAY_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            fallback_model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            referer: DEFAULT_REFERER.to_string(),
            title: DEFAULT_TITLE.to_string(),
            prompt_token_budget: DEFAULT_PROMPT_TOKEN_BUDGET,
            timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
        }
    }
}

impl Default for FigmaConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            api_url: DEFAULT_FIGMA_API_URL.to_string(),
            timeout_secs: DEFAULT_FIGMA_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read configuration from the environment
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(AppError::Config(format!("failed to read .env: {e}"))),
        }
        Self::from_env()
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let figma = FigmaConfig {
            access_token: get("FIGMA_ACCESS_TOKEN").or_else(|| get("FIGMA_TOKEN")),
            api_url: get("FIGMA_API_URL").unwrap_or_else(|| DEFAULT_FIGMA_API_URL.to_string()),
            timeout_secs: parse_or("FIGMA_TIMEOUT_SECS", get("FIGMA_TIMEOUT_SECS"), DEFAULT_FIGMA_TIMEOUT_SECS)?,
        };

        let gateway = GatewayConfig {
            api_key: get("OPENROUTER_API_KEY"),
            api_url: get("OPENROUTER_API_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            vision_model: get("OPENROUTER_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            fallback_model: get("OPENROUTER_FALLBACK_MODEL"),
            max_tokens: parse_or("OPENROUTER_MAX_TOKENS", get("OPENROUTER_MAX_TOKENS"), DEFAULT_MAX_TOKENS)?,
            temperature: parse_or("OPENROUTER_TEMPERATURE", get("OPENROUTER_TEMPERATURE"), DEFAULT_TEMPERATURE)?,
            referer: get("WIREFY_REFERER").unwrap_or_else(|| DEFAULT_REFERER.to_string()),
            title: get("WIREFY_TITLE").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            prompt_token_budget: parse_or(
                "WIREFY_PROMPT_TOKEN_BUDGET",
                get("WIREFY_PROMPT_TOKEN_BUDGET"),
                DEFAULT_PROMPT_TOKEN_BUDGET,
            )?,
            timeout_secs: parse_or(
                "OPENROUTER_TIMEOUT_SECS",
                get("OPENROUTER_TIMEOUT_SECS"),
                DEFAULT_GATEWAY_TIMEOUT_SECS,
            )?,
        };

        let server = ServerConfig {
            host: get("WIREFY_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or("WIREFY_PORT", get("WIREFY_PORT"), DEFAULT_PORT)?,
        };

        let workspace_root = PathBuf::from(get("WORKSPACE_ROOT").unwrap_or_else(|| ".".to_string()));
        let output = OutputConfig {
            plans_dir: get("PLANS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root.join("plans")),
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root.join("output")),
            workspace_root,
        };

        let config = Config {
            figma,
            gateway,
            server,
            output,
            mcp: McpConfig {
                backend_url: get("FIGMA_MCP_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            },
            log_level: get("WIREFY_LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.gateway.temperature) {
            return Err(AppError::Config(format!(
                "temperature must be between 0 and 2, got {}",
                self.gateway.temperature
            )));
        }
        if self.gateway.max_tokens == 0 {
            return Err(AppError::Config("max_tokens must be greater than 0".into()));
        }
        if self.server.port == 0 {
            return Err(AppError::Config("port must be greater than 0".into()));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: '{v}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.figma.api_url, DEFAULT_FIGMA_API_URL);
        assert_eq!(config.gateway.model, DEFAULT_MODEL);
        assert_eq!(config.gateway.max_tokens, 1000);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.output.plans_dir, PathBuf::from("./plans"));
        assert!(config.figma.access_token.is_none());
    }

    #[test]
    fn test_overrides_and_aliases() {
        let config = Config::from_lookup(lookup(&[
            ("FIGMA_TOKEN", "figd_abc"),
            ("OPENROUTER_MODEL", "openai/gpt-4o-mini"),
            ("WORKSPACE_ROOT", "/work"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("WIREFY_PORT", "9001"),
        ]))
        .unwrap();
        assert_eq!(config.figma.access_token.as_deref(), Some("figd_abc"));
        assert_eq!(config.gateway.model, "openai/gpt-4o-mini");
        assert_eq!(config.output.plans_dir, PathBuf::from("/work/plans"));
        assert_eq!(config.output.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.server.port, 9001);
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = Config::from_lookup(lookup(&[("OPENROUTER_API_KEY", "  ")])).unwrap();
        assert!(config.gateway.api_key.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_lookup(lookup(&[("WIREFY_PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("WIREFY_PORT"));

        let err = Config::from_lookup(lookup(&[("OPENROUTER_TEMPERATURE", "3.5")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = Config::from_lookup(lookup(&[("OPENROUTER_MAX_TOKENS", "0")])).unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let config = Config::from_lookup(lookup(&[("OPENROUTER_API_KEY", "sk-secret")])).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
