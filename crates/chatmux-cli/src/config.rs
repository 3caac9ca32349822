use anyhow::{Context, Result, bail};
use chatmux_core::{CooldownPolicy, FailoverConfig, GatewayError};
use chatmux_providers::{ProviderSpec, mask_secret};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatmuxConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub failover: FailoverSettings,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_token: String::new(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("auth_token", &mask_secret(&self.auth_token))
            .finish()
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Failover tuning. A timeout of 0 disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverSettings {
    #[serde(default = "default_cooldown_base_ms")]
    pub cooldown_base_ms: u64,
    #[serde(default = "default_cooldown_cap_ms")]
    pub cooldown_cap_ms: u64,
    #[serde(default = "default_first_token_timeout_secs")]
    pub first_token_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            cooldown_base_ms: default_cooldown_base_ms(),
            cooldown_cap_ms: default_cooldown_cap_ms(),
            first_token_timeout_secs: default_first_token_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_cooldown_base_ms() -> u64 {
    1000
}

fn default_cooldown_cap_ms() -> u64 {
    60_000
}

fn default_first_token_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    60
}

impl FailoverSettings {
    pub fn to_failover_config(&self) -> FailoverConfig {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        FailoverConfig {
            cooldown: CooldownPolicy {
                base: Duration::from_millis(self.cooldown_base_ms),
                cap: Duration::from_millis(self.cooldown_cap_ms),
            },
            first_token_timeout: secs(self.first_token_timeout_secs),
            idle_timeout: secs(self.idle_timeout_secs),
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatmux")
}

impl ChatmuxConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        check_permissions(&path)?;

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `chatmux init` first.",
                path.display()
            )
        })?;

        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Expand allowlisted env vars, parse and validate
    pub fn parse(content: &str) -> Result<Self> {
        warn_hardcoded_secrets(content);

        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            bail!("No providers configured. Add at least one [[providers]] entry.");
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &self.providers {
            if !seen.insert(spec.id.as_str()) {
                return Err(GatewayError::DuplicateProvider(spec.id.clone()).into());
            }
        }
        if self.failover.cooldown_base_ms > self.failover.cooldown_cap_ms {
            bail!(
                "failover.cooldown_base_ms ({}) exceeds cooldown_cap_ms ({})",
                self.failover.cooldown_base_ms,
                self.failover.cooldown_cap_ms
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid server.bind address '{}'", self.server.bind))
    }

    /// Copy with every secret masked, for display
    pub fn masked(&self) -> Self {
        let mut config = self.clone();
        if !config.server.auth_token.is_empty() {
            config.server.auth_token = mask_secret(&config.server.auth_token);
        }
        for spec in &mut config.providers {
            if !spec.api_key.is_empty() {
                spec.api_key = mask_secret(&spec.api_key);
            }
        }
        config
    }
}

// Refuse to start if group or other can read the file
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                bail!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It may contain secrets. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn warn_hardcoded_secrets(content: &str) {
    let Ok(raw) = toml::from_str::<ChatmuxConfig>(content) else {
        return;
    };
    for spec in &raw.providers {
        if !spec.api_key.is_empty() && !spec.api_key.contains("${") {
            warn!(
                "API key for provider '{}' is hardcoded in config file. For security, use environment variables: api_key = \"${{OPENAI_API_KEY}}\"",
                spec.id
            );
        }
    }
    if !raw.server.auth_token.is_empty() && !raw.server.auth_token.contains("${") {
        warn!(
            "Server auth token is hardcoded in config file. For security, use environment variables: auth_token = \"${{CHATMUX_AUTH_TOKEN}}\""
        );
    }
}

const ALLOWED_ENV_VARS: &[&str] = &[
    "CHATMUX_AUTH_TOKEN",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GOOGLE_AI_API_KEY",
    "CUSTOM_LLM_API_KEY",
];

fn expand_env_vars(s: &str) -> String {
    expand_with(s, |name| std::env::var(name).ok())
}

fn expand_with(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Left as-is so it's visible
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}
