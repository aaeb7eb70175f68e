//! Gateway configuration: TOML file with per-field defaults, overridable
//! by CLI flags.

use serde::Deserialize;
use std::path::Path;

use sg_domain::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillsConfig {
    /// Directory holding one subdirectory per script-backed skill
    /// (`<root>/<skill>/scripts/<script>`).
    #[serde(default = "default_skills_root")]
    pub root: String,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            root: default_skills_root(),
        }
    }
}

fn default_skills_root() -> String {
    "skills".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty = allow any (dev mode).
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Provider id (e.g. "openai").
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: i64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    /// Minutes between TTL sweeps.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_minutes: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
            max_sessions: default_max_sessions(),
            subscriber_capacity: default_subscriber_capacity(),
            cleanup_interval_minutes: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// Bearer tokens mapped to user ids. Empty = unauthenticated deployment
/// (user-scoped listings come back empty).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: String,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_provider() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_timeout_minutes() -> i64 {
    60
}
fn default_max_sessions() -> usize {
    100
}
fn default_subscriber_capacity() -> usize {
    100
}
fn default_cleanup_interval() -> u64 {
    10
}
fn default_max_iterations() -> u32 {
    10
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Load the config file when present, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.sessions.timeout_minutes, 60);
        assert_eq!(config.workers.max_iterations, 10);
        assert_eq!(config.skills.root, "skills");
        assert!(config.auth.tokens.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9100

            [[auth.tokens]]
            token = "secret"
            user_id = "alice"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.sessions.max_sessions, 100);
        assert_eq!(config.auth.tokens.len(), 1);
        assert_eq!(config.auth.tokens[0].user_id, "alice");
    }

    #[test]
    fn load_or_default_for_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.llm.provider, "openai");
    }

    #[test]
    fn load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[[broken").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
