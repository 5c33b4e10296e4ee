//! Configuration document types.
//!
//! Field names serialize in camelCase so documents written by older web
//! builds (`apiKey`, `baseURL`, `activeProfileId`) decode unchanged.

use serde::{Deserialize, Serialize};

use crate::storage::SCHEMA_VERSION;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// DeepSeek
    Deepseek,
    /// Moonshot Kimi
    Kimi,
    /// Google Gemini
    Gemini,
    /// Any OpenAI-compatible endpoint
    OpenaiCompatible,
    /// Volcengine ARK (Doubao)
    DoubaoArk,
}

/// Reasoning effort for reasoning-capable models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Reasoning disabled
    None,
    /// Minimal
    Minimal,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Above high, where the model supports it
    Xhigh,
}

/// Sampling parameters passed through to the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Completion length limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Presence penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Frequency penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Reasoning effort, for models that take one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// Provider credentials and model selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    /// Which provider to call
    pub provider: ProviderType,
    /// Secret. Only ever persisted inside the encrypted blob.
    #[serde(default)]
    pub api_key: String,
    /// Endpoint override; required for OpenAI-compatible providers
    #[serde(rename = "baseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model name as the provider spells it
    pub model: String,
    /// Sampling overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_params: Option<GenerationParams>,
    /// Server-side profile binding, when the backend holds the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_profile_id: Option<String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::Deepseek,
            api_key: String::new(),
            base_url: None,
            model: "deepseek-chat".to_string(),
            generation_params: None,
            ai_profile_id: None,
        }
    }
}

impl UserConfig {
    /// A config is usable once provider, key and model are all filled in
    pub fn is_usable(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.model.trim().is_empty()
    }
}

/// Per-1K-token pricing, USD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    /// ISO currency code
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Price per 1K prompt tokens
    #[serde(rename = "promptPer1K")]
    pub prompt_per_1k: f64,
    /// Price per 1K completion tokens
    #[serde(rename = "completionPer1K")]
    pub completion_per_1k: f64,
    /// Price per 1K cache-hit prompt tokens
    #[serde(rename = "cachedPromptPer1K", default, skip_serializing_if = "Option::is_none")]
    pub cached_prompt_per_1k: Option<f64>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Outcome of the last connection test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The provider answered
    Success,
    /// The request failed
    Error,
}

/// Result of probing a provider with a ping request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    /// Pass or fail
    pub status: TestStatus,
    /// Unix milliseconds
    pub tested_at: i64,
    /// Round-trip time
    pub duration_ms: u64,
    /// HTTP status, when the failure carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Raw error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Hints for fixing the failure, shown in UI
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// A named, self-contained set of provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigProfile {
    /// `cfg_<millis>_<suffix>`
    pub id: String,
    /// Display name
    pub name: String,
    /// Provider settings
    pub config: UserConfig,
    /// Optional cost estimate inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Pricing>,
    /// Most recent connection test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test: Option<ConnectionTestResult>,
    /// RFC 3339
    pub created_at: String,
    /// RFC 3339
    pub updated_at: String,
}

/// The single encrypted document of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Schema version the document was written with
    pub version: u32,
    /// Profile used for generation; always one of `profiles` when set
    #[serde(default)]
    pub active_profile_id: Option<String>,
    /// All saved profiles, in creation order
    #[serde(default)]
    pub profiles: Vec<ConfigProfile>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            active_profile_id: None,
            profiles: Vec::new(),
        }
    }
}

impl ConfigDocument {
    /// The active profile, falling back to the first one
    pub fn active_profile(&self) -> Option<&ConfigProfile> {
        self.active_profile_id
            .as_deref()
            .and_then(|id| self.profile(id))
            .or_else(|| self.profiles.first())
    }

    /// Look up a profile by id
    pub fn profile(&self, id: &str) -> Option<&ConfigProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub(crate) fn profile_mut(&mut self, id: &str) -> Option<&mut ConfigProfile> {
        self.profiles.iter_mut().find(|p| p.id == id)
    }

    /// Repair `active_profile_id` so it names an existing profile
    ///
    /// Empty list → `None`; dangling id → first profile.
    pub fn normalize_active(&mut self) {
        let valid = self
            .active_profile_id
            .as_deref()
            .is_some_and(|id| self.profiles.iter().any(|p| p.id == id));
        if !valid {
            self.active_profile_id = self.profiles.first().map(|p| p.id.clone());
        }
    }
}
