//! Profile CRUD over the encrypted config store.
//!
//! Every mutation is load → change → save against the blob; there is no
//! long-lived in-memory copy that could drift from what is persisted.

use std::time::Duration;

use rand::Rng;

use super::model::{
    ConfigDocument, ConfigProfile, ConnectionTestResult, Pricing, ProviderType, TestStatus,
    UserConfig,
};
use crate::error::{Error, Result};
use crate::storage::ConfigStore;
use crate::time::{now_rfc3339, now_timestamp_millis};

/// Alphabet for the random part of profile ids
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Fields for a new profile; anything left out gets a default
#[derive(Debug, Clone, Default)]
pub struct ProfileDraft {
    /// Display name; numbered automatically when absent
    pub name: Option<String>,
    /// Provider settings; the defaults when absent
    pub config: Option<UserConfig>,
    /// Pricing inputs
    pub pricing: Option<Pricing>,
}

/// Partial profile update
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    /// New display name
    pub name: Option<String>,
    /// Replacement provider settings
    pub config: Option<UserConfig>,
    /// `Some(None)` removes pricing
    pub pricing: Option<Option<Pricing>>,
    /// Latest connection test result
    pub last_test: Option<ConnectionTestResult>,
}

/// Profile operations on top of a [`ConfigStore`]
#[derive(Debug, Clone)]
pub struct ProfileService {
    store: ConfigStore,
}

impl ProfileService {
    /// Create a service over `store`
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Load the document, bootstrapping a default profile on first run
    ///
    /// When a blob exists but cannot be read (locked, or a wrong password)
    /// this returns an empty document and writes nothing.
    pub fn load_or_bootstrap(&self) -> Result<ConfigDocument> {
        if let Some(doc) = self.store.load()? {
            return Ok(doc);
        }

        if self.store.has_stored_blob() {
            tracing::info!("Stored config is not readable yet; returning locked view");
            return Ok(ConfigDocument::default());
        }

        let mut doc = bootstrap_document(UserConfig::default());
        self.store.save(&mut doc)?;
        tracing::info!("Bootstrapped default profile");
        Ok(doc)
    }

    /// Replace the active profile's config
    ///
    /// Returns the id of the profile that was written.
    pub fn save_config(&self, config: UserConfig) -> Result<String> {
        let Some(mut doc) = self.document()? else {
            let mut doc = bootstrap_document(config);
            self.store.save(&mut doc)?;
            return Ok(doc.active_profile_id.unwrap_or_default());
        };

        if doc.profiles.is_empty() {
            let mut fresh = bootstrap_document(config);
            self.store.save(&mut fresh)?;
            return Ok(fresh.active_profile_id.unwrap_or_default());
        }

        doc.normalize_active();
        let id = doc.active_profile_id.clone().unwrap_or_default();
        if let Some(profile) = doc.profile_mut(&id) {
            profile.config = config;
            profile.updated_at = now_rfc3339();
        }
        self.store.save(&mut doc)?;
        Ok(id)
    }

    /// Add a profile at the front of the list and make it active
    pub fn create_profile(&self, draft: ProfileDraft) -> Result<String> {
        let mut doc = self.document()?.unwrap_or_default();

        let id = new_profile_id();
        let now = now_rfc3339();
        let name = draft
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("New profile {}", &id[id.len() - 4..]));

        doc.profiles.insert(
            0,
            ConfigProfile {
                id: id.clone(),
                name,
                config: draft.config.unwrap_or_default(),
                pricing: draft.pricing,
                last_test: None,
                created_at: now.clone(),
                updated_at: now,
            },
        );
        doc.active_profile_id = Some(id.clone());

        self.store.save(&mut doc)?;
        tracing::info!("Created profile {}", id);
        Ok(id)
    }

    /// Apply `update` to profile `id`; `false` if there is no such profile
    pub fn update_profile(&self, id: &str, update: ProfileUpdate) -> Result<bool> {
        let Some(mut doc) = self.document()? else {
            return Ok(false);
        };
        let Some(profile) = doc.profile_mut(id) else {
            return Ok(false);
        };

        if let Some(name) = update.name {
            let name = name.trim();
            if !name.is_empty() {
                profile.name = name.to_string();
            }
        }
        if let Some(config) = update.config {
            profile.config = config;
        }
        if let Some(pricing) = update.pricing {
            profile.pricing = pricing;
        }
        if let Some(last_test) = update.last_test {
            profile.last_test = Some(last_test);
        }
        profile.updated_at = now_rfc3339();

        self.store.save(&mut doc)?;
        Ok(true)
    }

    /// Make `id` the active profile; unknown ids are ignored
    pub fn set_active_profile(&self, id: &str) -> Result<bool> {
        let Some(mut doc) = self.document()? else {
            return Ok(false);
        };
        if doc.profile(id).is_none() {
            tracing::debug!("Ignoring activation of unknown profile {}", id);
            return Ok(false);
        }

        doc.active_profile_id = Some(id.to_string());
        self.store.save(&mut doc)?;
        Ok(true)
    }

    /// Remove profile `id`
    ///
    /// Removing the last profile deletes the stored document. Removing the
    /// active one activates the first remaining profile.
    pub fn delete_profile(&self, id: &str) -> Result<bool> {
        let Some(mut doc) = self.document()? else {
            return Ok(false);
        };

        let before = doc.profiles.len();
        doc.profiles.retain(|p| p.id != id);
        if doc.profiles.len() == before {
            return Ok(false);
        }

        if doc.profiles.is_empty() {
            self.store.remove_document()?;
            tracing::info!("Deleted last profile {}; config removed", id);
            return Ok(true);
        }

        if doc.active_profile_id.as_deref() == Some(id) {
            doc.active_profile_id = None;
        }
        doc.normalize_active();
        self.store.save(&mut doc)?;
        tracing::info!("Deleted profile {}", id);
        Ok(true)
    }

    /// Config of the active profile, if it is usable
    pub fn active_config(&self) -> Result<Option<UserConfig>> {
        Ok(self
            .store
            .load()?
            .and_then(|doc| doc.active_profile().map(|p| p.config.clone()))
            .filter(Self::is_usable))
    }

    /// Provider, non-empty API key and model are all set
    pub fn is_usable(config: &UserConfig) -> bool {
        config.is_usable()
    }

    /// Build the failure record for a connection test
    ///
    /// The HTTP status is read from a `(NNN` fragment in `error_message`.
    /// Suggestions are deduplicated, the status-specific one first.
    pub fn connection_test_failure(
        config: &UserConfig,
        error_message: &str,
        duration: Duration,
    ) -> ConnectionTestResult {
        let http_status = http_status_from_message(error_message);
        let mut suggestions = vec![status_suggestion(http_status).to_string()];

        if config.api_key.trim().is_empty() {
            suggestions.push("API key is empty: fill in the API key first.".into());
        }
        if config.model.trim().is_empty() {
            suggestions.push("Model name is empty: fill in the model name first.".into());
        }

        let base_url = config.base_url.as_deref().map(str::trim).unwrap_or("");
        let trimmed = base_url.trim_end_matches('/');
        if !base_url.is_empty() && (trimmed.ends_with("/v1") || trimmed.ends_with("/v1beta")) {
            suggestions.push(
                "Do not include /v1 or /v1beta in the base URL; the path is appended automatically."
                    .into(),
            );
        }

        suggestions.extend(provider_suggestions(config.provider).iter().map(|s| s.to_string()));

        let mut seen = std::collections::HashSet::new();
        suggestions.retain(|s| seen.insert(s.clone()));

        ConnectionTestResult {
            status: TestStatus::Error,
            tested_at: now_timestamp_millis(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            http_status,
            error_message: Some(error_message.to_string()),
            suggestions,
        }
    }

    /// Current document for a mutation
    ///
    /// `Ok(None)` means nothing is stored. A blob that exists but cannot
    /// be read is `Locked`, so it is never overwritten.
    fn document(&self) -> Result<Option<ConfigDocument>> {
        match self.store.load()? {
            Some(doc) => Ok(Some(doc)),
            None if self.store.has_stored_blob() => Err(Error::Locked),
            None => Ok(None),
        }
    }
}

/// `cfg_<unix millis>_<7 base36 chars>`
pub fn new_profile_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..7)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("cfg_{}_{}", now_timestamp_millis(), suffix)
}

fn bootstrap_document(config: UserConfig) -> ConfigDocument {
    let id = new_profile_id();
    let now = now_rfc3339();
    ConfigDocument {
        active_profile_id: Some(id.clone()),
        profiles: vec![ConfigProfile {
            id,
            name: "Default profile".to_string(),
            config,
            pricing: None,
            last_test: None,
            created_at: now.clone(),
            updated_at: now,
        }],
        ..Default::default()
    }
}

/// First `(NNN` in the message, where NNN is three digits not followed by
/// another digit
fn http_status_from_message(message: &str) -> Option<u16> {
    let bytes = message.as_bytes();
    bytes.iter().enumerate().find_map(|(i, &b)| {
        if b != b'(' {
            return None;
        }
        let digits = bytes.get(i + 1..i + 4)?;
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        if bytes.get(i + 4).is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_') {
            return None;
        }
        std::str::from_utf8(digits).ok()?.parse().ok()
    })
}

fn status_suggestion(status: Option<u16>) -> &'static str {
    match status {
        Some(401) | Some(403) => {
            "Authentication failed: check that the API key is correct, not expired, and belongs to this provider."
        }
        Some(404) => "Not found: check the base URL and the model name.",
        Some(429) => "Rate limited or out of quota: retry later, or switch model or raise the quota.",
        Some(s) if s >= 500 => "Server error: retry later or switch to another endpoint.",
        _ => "Network problem: check connectivity, proxy or VPN, and CORS errors in the console.",
    }
}

fn provider_suggestions(provider: ProviderType) -> &'static [&'static str] {
    match provider {
        ProviderType::Deepseek => &[
            "DeepSeek default base URL: `https://api.deepseek.com` (leave empty to use it).",
            "Common models: `deepseek-chat`, `deepseek-reasoner`.",
        ],
        ProviderType::Kimi => &[
            "Kimi needs no base URL; common models: `moonshot-v1-8k`, `moonshot-v1-32k`.",
        ],
        ProviderType::Gemini => &[
            "Gemini default base URL: `https://generativelanguage.googleapis.com` (leave empty to use it).",
            "Models: `gemini-1.5-flash`, `gemini-1.5-pro`, `gemini-pro`.",
        ],
        ProviderType::OpenaiCompatible => &[
            "OpenAI compatible: use the domain root as base URL (no /v1); `/v1/chat/completions` is appended.",
            "AiHubMix base URL: `https://aihubmix.com` (a trailing `/v1` is normalized away).",
            "Models: `gpt-4o-mini`, `gpt-4o`, `gpt-3.5-turbo`.",
        ],
        ProviderType::DoubaoArk => &[
            "Doubao / ARK base URL: `https://ark.cn-beijing.volces.com/api/v3`.",
            "Text models: `doubao-seed-1-8-251215`, `doubao-seed-1-6-251015`.",
        ],
    }
}

// ============================================================================
// TESTS
// ============================================================================
