//! Build provider adapters from configuration entries

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chatmux_core::{ChatProvider, ProviderRegistry};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openai_compat")]
    OpenAiCompat,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "ollama")]
    Ollama,
}

impl ProviderKind {
    fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::Google => Some("https://generativelanguage.googleapis.com"),
            Self::Ollama => Some("http://localhost:11434"),
            Self::OpenAiCompat => None,
        }
    }

    fn default_model(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("gpt-4o"),
            Self::Anthropic => Some("claude-sonnet-4-20250514"),
            Self::Google => Some("gemini-2.0-flash"),
            Self::Ollama => Some("llama3.2"),
            Self::OpenAiCompat => None,
        }
    }

    fn requires_key(self) -> bool {
        matches!(self, Self::OpenAi | Self::Anthropic | Self::Google)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::OpenAiCompat => write!(f, "openai_compat"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Google => write!(f, "google"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// One configured provider
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Show at most the first 3 and last 4 characters of a secret
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

/// Construct the adapter for a config entry
pub fn build_provider(spec: &ProviderSpec) -> Result<Arc<dyn ChatProvider>> {
    if spec.id.trim().is_empty() {
        bail!("provider id must not be empty");
    }
    if spec.kind.requires_key() && spec.api_key.trim().is_empty() {
        bail!("provider '{}' ({}) requires an api_key", spec.id, spec.kind);
    }

    let Some(base_url) = spec
        .base_url
        .clone()
        .or_else(|| spec.kind.default_base_url().map(str::to_string))
    else {
        bail!("provider '{}' ({}) requires a base_url", spec.id, spec.kind);
    };
    let Some(model) = spec
        .model
        .clone()
        .or_else(|| spec.kind.default_model().map(str::to_string))
    else {
        bail!("provider '{}' ({}) requires a model", spec.id, spec.kind);
    };

    let id = spec.id.clone();
    let api_key = spec.api_key.clone();
    let timeout = Duration::from_secs(spec.connect_timeout_secs);

    let provider: Arc<dyn ChatProvider> = match spec.kind {
        ProviderKind::OpenAi | ProviderKind::OpenAiCompat => Arc::new(OpenAiProvider::new(
            id, api_key, model, base_url, spec.max_tokens, timeout,
        )?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            id, api_key, model, base_url, spec.max_tokens, timeout,
        )?),
        ProviderKind::Google => Arc::new(GoogleProvider::new(
            id, api_key, model, base_url, spec.max_tokens, timeout,
        )?),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(
            id, model, base_url, spec.max_tokens, timeout,
        )?),
    };

    info!("Configured provider {} ({})", spec.id, spec.kind);
    Ok(provider)
}

/// Build a registry with providers in config order
pub fn build_registry(specs: &[ProviderSpec]) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for spec in specs {
        registry.register(build_provider(spec)?)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmux_core::GatewayError;

    fn spec(id: &str, kind: ProviderKind, api_key: &str) -> ProviderSpec {
        ProviderSpec {
            id: id.to_string(),
            kind,
            api_key: api_key.to_string(),
            base_url: None,
            model: None,
            max_tokens: default_max_tokens(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    #[test]
    fn test_spec_from_toml_defaults() {
        let spec: ProviderSpec = toml::from_str(
            r#"
            id = "claude"
            kind = "anthropic"
            api_key = "sk-ant-123"
            "#,
        )
        .unwrap();
        assert_eq!(spec.kind, ProviderKind::Anthropic);
        assert_eq!(spec.max_tokens, 4096);
        assert_eq!(spec.connect_timeout_secs, 10);
        assert!(spec.model.is_none());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: std::result::Result<ProviderSpec, _> = toml::from_str(
            r#"
            id = "x"
            kind = "cohere"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_build_each_kind() {
        for (kind, key) in [
            (ProviderKind::OpenAi, "sk-1"),
            (ProviderKind::Anthropic, "sk-ant-1"),
            (ProviderKind::Google, "g-1"),
            (ProviderKind::Ollama, ""),
        ] {
            let provider = build_provider(&spec("p", kind, key)).unwrap();
            assert_eq!(provider.id(), "p");
        }
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = build_provider(&spec("main", ProviderKind::OpenAi, "")).err().unwrap();
        assert!(err.to_string().contains("requires an api_key"));
    }

    #[test]
    fn test_compat_requires_base_url_and_model() {
        let mut compat = spec("groq", ProviderKind::OpenAiCompat, "");
        assert!(build_provider(&compat).err().unwrap().to_string().contains("base_url"));
        compat.base_url = Some("https://api.groq.com/openai".to_string());
        assert!(build_provider(&compat).err().unwrap().to_string().contains("model"));
        compat.model = Some("llama-3.3-70b".to_string());
        assert!(build_provider(&compat).is_ok());
    }

    #[test]
    fn test_build_registry_rejects_duplicates() {
        let specs = vec![
            spec("local", ProviderKind::Ollama, ""),
            spec("local", ProviderKind::Ollama, ""),
        ];
        let err = build_registry(&specs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GatewayError>(),
            Some(GatewayError::DuplicateProvider(id)) if id == "local"
        ));
    }

    #[test]
    fn test_spec_debug_masks_key() {
        let debug = format!("{:?}", spec("main", ProviderKind::OpenAi, "sk-abcdefghijkl"));
        assert!(!debug.contains("sk-abcdefghijkl"));
        assert!(debug.contains("sk-...ijkl"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-ant-api03-xyz1234"), "sk-...1234");
    }
}
