use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::ApiEndpoint;
use crate::retry::RetryConfig;
use crate::transcribe::Tier;

/// How a provider produces transcripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Request/poll HTTP API
    Api,
    /// Scripted page automation
    BrowserAutomation,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Api => "api",
            CapabilityKind::BrowserAutomation => "browser_automation",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured transcription backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique provider id
    pub id: String,

    pub kind: CapabilityKind,

    /// Lower runs first
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Environment variable holding the bearer credential, if one is required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,

    /// Tiers this provider serves
    #[serde(default = "default_tiers")]
    pub tiers: Vec<Tier>,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Endpoint block, required for API providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiEndpoint>,
}

fn default_priority() -> u32 {
    100
}

fn default_enabled() -> bool {
    true
}

fn default_tiers() -> Vec<Tier> {
    vec![Tier::Quick, Tier::Deep]
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, kind: CapabilityKind, priority: u32) -> Self {
        Self {
            id: id.into(),
            kind,
            priority,
            enabled: true,
            credential_env: None,
            tiers: default_tiers(),
            retry: RetryConfig::default(),
            api: None,
        }
    }

    pub fn serves(&self, tier: Tier) -> bool {
        self.tiers.contains(&tier)
    }
}

/// Supplies bearer credentials per provider on demand
pub trait CredentialSource: Send + Sync {
    /// Credential for the provider, or `None` when absent
    fn credential(&self, descriptor: &ProviderDescriptor) -> Option<String>;
}

/// Reads credentials from the environment variable each descriptor names
#[derive(Debug, Default, Clone)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn credential(&self, descriptor: &ProviderDescriptor) -> Option<String> {
        let var = descriptor.credential_env.as_deref()?;
        std::env::var(var).ok()
    }
}

/// Why a provider was left out of a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Disabled,
    MissingCredential,
    Tier,
}

impl FilterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterReason::Disabled => "disabled",
            FilterReason::MissingCredential => "missing_credential",
            FilterReason::Tier => "tier",
        }
    }
}

/// A provider that passed selection, with its resolved credential
#[derive(Debug, Clone)]
pub struct SelectedProvider {
    pub descriptor: ProviderDescriptor,
    pub credential: Option<String>,
}

/// Registry of configured providers, read-only during a run
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderDescriptor>) -> Self {
        Self { providers }
    }

    pub fn all(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    fn check(
        &self,
        descriptor: &ProviderDescriptor,
        tier: Tier,
        credentials: &dyn CredentialSource,
    ) -> Result<Option<String>, FilterReason> {
        if !descriptor.enabled {
            return Err(FilterReason::Disabled);
        }
        let credential = match &descriptor.credential_env {
            Some(_) => match credentials.credential(descriptor) {
                Some(value) if !value.trim().is_empty() => Some(value),
                // Fail closed: a required credential that is absent or blank disables the provider
                _ => return Err(FilterReason::MissingCredential),
            },
            None => None,
        };
        if !descriptor.serves(tier) {
            return Err(FilterReason::Tier);
        }
        Ok(credential)
    }

    /// Usable providers for `tier`, by ascending priority, configuration order on ties.
    ///
    /// Pure function of the registry and the credential source. An empty result means no
    /// provider can serve the request.
    pub fn select_ordered(&self, tier: Tier, credentials: &dyn CredentialSource) -> Vec<SelectedProvider> {
        let mut selected: Vec<SelectedProvider> = self
            .providers
            .iter()
            .filter_map(|descriptor| {
                self.check(descriptor, tier, credentials)
                    .ok()
                    .map(|credential| SelectedProvider {
                        descriptor: descriptor.clone(),
                        credential,
                    })
            })
            .collect();
        // sort_by_key is stable
        selected.sort_by_key(|p| p.descriptor.priority);
        selected
    }

    /// Every configured provider with the reason it would be skipped, in priority order
    pub fn explain(
        &self,
        tier: Tier,
        credentials: &dyn CredentialSource,
    ) -> Vec<(&ProviderDescriptor, Option<FilterReason>)> {
        let mut rows: Vec<_> = self
            .providers
            .iter()
            .map(|descriptor| (descriptor, self.check(descriptor, tier, credentials).err()))
            .collect();
        rows.sort_by_key(|(descriptor, _)| descriptor.priority);
        rows
    }
}
