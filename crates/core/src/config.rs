use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model backend families the gateway can talk to.
///
/// Adding a provider means one new variant here, one row in the default-model
/// table, and one adapter in `nimbus-ai`; nothing else branches on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl AiProvider {
    /// Hosted backends authenticate with a tenant credential; the self-hosted
    /// daemon is reached by base URL alone.
    pub fn requires_credential(self) -> bool {
        !matches!(self, Self::Ollama)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AiProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported ai provider `{other}` (expected openai|anthropic|gemini|ollama)"
            ))),
        }
    }
}

/// Independently toggleable AI features. Each maps to one orchestrator entry
/// point; a disabled flag fails the call closed rather than falling back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    DocumentAnalysis,
    EmailDraft,
    Insights,
    Rag,
}

impl Capability {
    pub fn key(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::DocumentAnalysis => "document_analysis",
            Self::EmailDraft => "email_draft",
            Self::Insights => "insights",
            Self::Rag => "rag",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-tenant AI configuration, owned by the settings subsystem and read-only
/// from this core. Never hard-deleted upstream: disabling a feature clears a
/// flag in `enabled` rather than removing the row.
#[derive(Clone, Debug)]
pub struct TenantAiConfig {
    pub provider: AiProvider,
    pub credential: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub enabled: BTreeSet<Capability>,
}

impl TenantAiConfig {
    pub fn new(provider: AiProvider) -> Self {
        Self { provider, credential: None, base_url: None, model: None, enabled: BTreeSet::new() }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into().into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn enable(mut self, capability: Capability) -> Self {
        self.enabled.insert(capability);
        self
    }

    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.enabled.contains(&capability)
    }

    pub fn has_credential(&self) -> bool {
        self.credential
            .as_ref()
            .map(|credential| !credential.expose_secret().trim().is_empty())
            .unwrap_or(false)
    }

    /// Masked form safe to echo back to a settings screen. Shows at most the
    /// last four characters of the stored credential.
    pub fn masked_credential(&self) -> Option<String> {
        let credential = self.credential.as_ref()?;
        let raw = credential.expose_secret().trim();
        if raw.is_empty() {
            return None;
        }
        if raw.chars().count() <= 4 {
            return Some("****".to_string());
        }
        let tail: String =
            raw.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        Some(format!("****{tail}"))
    }
}

/// Gateway-wide tunables. The original thresholds are defaults, not invariants,
/// so everything here is loadable from `nimbus.toml` plus `NIMBUS_*` env
/// overrides.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub context: ContextConfig,
    pub retrieval: RetrievalConfig,
    pub invocation: InvocationConfig,
    pub limiter: LimiterConfig,
}

#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Hard ceiling, in characters, on the rendered context digest.
    pub char_ceiling: usize,
    /// Appended exactly once when the digest overflows the ceiling.
    pub truncation_marker: String,
    /// Days without recorded activity before a customer counts as inactive.
    pub inactive_days: i64,
    /// Horizon, in days, for the "closing soon" deal section.
    pub close_horizon_days: i64,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
}

#[derive(Clone, Debug)]
pub struct InvocationConfig {
    pub chat_timeout_secs: u64,
    pub email_timeout_secs: u64,
    pub insights_timeout_secs: u64,
    pub connection_test_timeout_secs: u64,
    pub chat_max_output_tokens: u32,
    pub email_max_output_tokens: u32,
    pub insights_max_output_tokens: u32,
    pub connection_test_max_output_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct LimiterConfig {
    pub sweep_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig {
                char_ceiling: 4000,
                truncation_marker: "\n[context truncated]".to_string(),
                inactive_days: 90,
                close_horizon_days: 30,
            },
            retrieval: RetrievalConfig { default_top_k: 5 },
            invocation: InvocationConfig {
                chat_timeout_secs: 30,
                email_timeout_secs: 30,
                insights_timeout_secs: 45,
                connection_test_timeout_secs: 10,
                chat_max_output_tokens: 1024,
                email_max_output_tokens: 800,
                insights_max_output_tokens: 1024,
                connection_test_max_output_tokens: 8,
            },
            limiter: LimiterConfig { sweep_interval_secs: 300 },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    context: Option<ContextPatch>,
    retrieval: Option<RetrievalPatch>,
    invocation: Option<InvocationPatch>,
    limiter: Option<LimiterPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ContextPatch {
    char_ceiling: Option<usize>,
    truncation_marker: Option<String>,
    inactive_days: Option<i64>,
    close_horizon_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    default_top_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct InvocationPatch {
    chat_timeout_secs: Option<u64>,
    email_timeout_secs: Option<u64>,
    insights_timeout_secs: Option<u64>,
    connection_test_timeout_secs: Option<u64>,
    chat_max_output_tokens: Option<u32>,
    email_max_output_tokens: Option<u32>,
    insights_max_output_tokens: Option<u32>,
    connection_test_max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LimiterPatch {
    sweep_interval_secs: Option<u64>,
}

impl GatewayConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("nimbus.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(context) = patch.context {
            if let Some(char_ceiling) = context.char_ceiling {
                self.context.char_ceiling = char_ceiling;
            }
            if let Some(truncation_marker) = context.truncation_marker {
                self.context.truncation_marker = truncation_marker;
            }
            if let Some(inactive_days) = context.inactive_days {
                self.context.inactive_days = inactive_days;
            }
            if let Some(close_horizon_days) = context.close_horizon_days {
                self.context.close_horizon_days = close_horizon_days;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(default_top_k) = retrieval.default_top_k {
                self.retrieval.default_top_k = default_top_k;
            }
        }

        if let Some(invocation) = patch.invocation {
            if let Some(value) = invocation.chat_timeout_secs {
                self.invocation.chat_timeout_secs = value;
            }
            if let Some(value) = invocation.email_timeout_secs {
                self.invocation.email_timeout_secs = value;
            }
            if let Some(value) = invocation.insights_timeout_secs {
                self.invocation.insights_timeout_secs = value;
            }
            if let Some(value) = invocation.connection_test_timeout_secs {
                self.invocation.connection_test_timeout_secs = value;
            }
            if let Some(value) = invocation.chat_max_output_tokens {
                self.invocation.chat_max_output_tokens = value;
            }
            if let Some(value) = invocation.email_max_output_tokens {
                self.invocation.email_max_output_tokens = value;
            }
            if let Some(value) = invocation.insights_max_output_tokens {
                self.invocation.insights_max_output_tokens = value;
            }
            if let Some(value) = invocation.connection_test_max_output_tokens {
                self.invocation.connection_test_max_output_tokens = value;
            }
        }

        if let Some(limiter) = patch.limiter {
            if let Some(sweep_interval_secs) = limiter.sweep_interval_secs {
                self.limiter.sweep_interval_secs = sweep_interval_secs;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("NIMBUS_CONTEXT_CHAR_CEILING") {
            self.context.char_ceiling = parse_usize("NIMBUS_CONTEXT_CHAR_CEILING", &value)?;
        }
        if let Some(value) = read_env("NIMBUS_CONTEXT_TRUNCATION_MARKER") {
            self.context.truncation_marker = value;
        }
        if let Some(value) = read_env("NIMBUS_CONTEXT_INACTIVE_DAYS") {
            self.context.inactive_days = parse_i64("NIMBUS_CONTEXT_INACTIVE_DAYS", &value)?;
        }
        if let Some(value) = read_env("NIMBUS_RETRIEVAL_DEFAULT_TOP_K") {
            self.retrieval.default_top_k = parse_usize("NIMBUS_RETRIEVAL_DEFAULT_TOP_K", &value)?;
        }
        if let Some(value) = read_env("NIMBUS_CHAT_TIMEOUT_SECS") {
            self.invocation.chat_timeout_secs = parse_u64("NIMBUS_CHAT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("NIMBUS_CONNECTION_TEST_TIMEOUT_SECS") {
            self.invocation.connection_test_timeout_secs =
                parse_u64("NIMBUS_CONNECTION_TEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("NIMBUS_LIMITER_SWEEP_INTERVAL_SECS") {
            self.limiter.sweep_interval_secs =
                parse_u64("NIMBUS_LIMITER_SWEEP_INTERVAL_SECS", &value)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let marker_chars = self.context.truncation_marker.chars().count();
        if self.context.char_ceiling <= marker_chars {
            return Err(ConfigError::Validation(format!(
                "context.char_ceiling ({}) must exceed the truncation marker length ({marker_chars})",
                self.context.char_ceiling
            )));
        }
        if self.context.inactive_days <= 0 {
            return Err(ConfigError::Validation(
                "context.inactive_days must be positive".to_string(),
            ));
        }
        if self.context.close_horizon_days <= 0 {
            return Err(ConfigError::Validation(
                "context.close_horizon_days must be positive".to_string(),
            ));
        }
        if self.retrieval.default_top_k == 0 {
            return Err(ConfigError::Validation(
                "retrieval.default_top_k must be at least 1".to_string(),
            ));
        }
        let timeouts = [
            ("invocation.chat_timeout_secs", self.invocation.chat_timeout_secs),
            ("invocation.email_timeout_secs", self.invocation.email_timeout_secs),
            ("invocation.insights_timeout_secs", self.invocation.insights_timeout_secs),
            (
                "invocation.connection_test_timeout_secs",
                self.invocation.connection_test_timeout_secs,
            ),
            ("limiter.sweep_interval_secs", self.limiter.sweep_interval_secs),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{key} must be positive")));
            }
        }
        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("nimbus.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}
