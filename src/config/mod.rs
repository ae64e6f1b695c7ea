use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::api::{ApiEndpoint, PollingConfig};
use crate::automation::AutomationConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::providers::{CapabilityKind, ProviderDescriptor, ProviderRegistry};
use crate::retry::RetryConfig;
use crate::transcribe::Tier;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "TRANSCRIPTOR_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG: &str = "transcriptor.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Transcription backends, tried by ascending priority
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderDescriptor>,

    /// Status polling for API providers
    #[serde(default)]
    pub polling: PollingConfig,

    /// Target page and timing for browser automation
    #[serde(default)]
    pub automation: AutomationConfig,

    /// Run-wide limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

fn default_providers() -> Vec<ProviderDescriptor> {
    let mut api = ProviderDescriptor::new("tokscript-api", CapabilityKind::Api, 1);
    api.credential_env = Some("TOKSCRIPT_API_TOKEN".to_string());
    api.api = Some(ApiEndpoint::new("https://api.tokscript.com"));
    api.retry = RetryConfig {
        max_delay_ms: 30_000,
        ..RetryConfig::default()
    };

    let mut web = ProviderDescriptor::new("tokaudit-web", CapabilityKind::BrowserAutomation, 2);
    web.retry = RetryConfig {
        max_attempts: 2,
        ..RetryConfig::default()
    };

    vec![api, web]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            polling: PollingConfig::default(),
            automation: AutomationConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::config_path(explicit)?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path).context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

            config.validate()?;
            tracing::debug!(path = %config_path.display(), providers = config.providers.len(), "config_loaded");
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            tracing::info!(path = %config_path.display(), "config_created");
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path(None)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path: explicit path, `TRANSCRIPTOR_CONFIG`, working directory, user config dir
    pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("shortform-transcriptor").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                anyhow::bail!("Provider ids must not be empty");
            }
            if !seen.insert(provider.id.as_str()) {
                anyhow::bail!("Duplicate provider id '{}'", provider.id);
            }
            if provider.retry.multiplier < 1.0 {
                anyhow::bail!("Provider '{}' has a retry multiplier below 1.0", provider.id);
            }
            match (provider.kind, &provider.api) {
                (CapabilityKind::Api, None) => {
                    anyhow::bail!("API provider '{}' needs an api block with a base_url", provider.id)
                }
                (CapabilityKind::Api, Some(endpoint)) => {
                    check_url(&endpoint.base_url).with_context(|| format!("Provider '{}' base_url", provider.id))?;
                }
                (CapabilityKind::BrowserAutomation, _) => {}
            }
        }

        check_url(&self.automation.entry_url).context("automation.entry_url")?;

        if self.polling.interval_ms == 0 || self.polling.max_polls == 0 {
            anyhow::bail!("polling.interval_ms and polling.max_polls must be positive");
        }

        Ok(())
    }

    /// Registry built from the configured providers
    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::new(self.providers.clone())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Providers:");
        for provider in &self.providers {
            let tiers: Vec<&str> = provider.tiers.iter().map(Tier::as_str).collect();
            println!(
                "    • {} ({}, priority {}, {}) tiers: {}",
                provider.id,
                provider.kind,
                provider.priority,
                if provider.enabled { "enabled" } else { "disabled" },
                tiers.join(", ")
            );
            if let Some(var) = &provider.credential_env {
                println!("      credential from ${}", var);
            }
            if let Some(api) = &provider.api {
                println!("      endpoint: {}", api.base_url);
            }
        }
        println!(
            "  Polling: every {}ms, up to {} polls",
            self.polling.interval_ms, self.polling.max_polls
        );
        println!("  Automation entry: {}", self.automation.entry_url);
        println!("  Headless: {}", self.automation.headless);
        match self.orchestrator.overall_ceiling() {
            Some(ceiling) => println!("  Overall ceiling: {}s", ceiling.as_secs()),
            None => println!("  Overall ceiling: none"),
        }
    }
}

fn check_url(value: &str) -> Result<()> {
    let parsed = Url::parse(value).with_context(|| format!("Invalid URL '{value}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL '{value}' must use http or https");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.registry().all()[0].id, "tokscript-api");
    }

    #[test]
    fn test_duplicate_provider_ids_rejected() {
        let mut config = Config::default();
        let copy = config.providers[1].clone();
        config.providers.push(copy);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate provider id"));
    }

    #[test]
    fn test_api_provider_requires_endpoint() {
        let mut config = Config::default();
        config.providers[0].api = None;
        assert!(config.validate().is_err());

        config.providers[0].api = Some(ApiEndpoint::new("not a url"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config, Config::default());

        // Second load reads the file back
        assert_eq!(Config::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs_err::write(
            &path,
            "providers:\n  - id: web\n    kind: browser_automation\n    priority: 1\npolling:\n  interval_ms: 500\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.polling.max_polls, 90);
        assert_eq!(config.automation, AutomationConfig::default());
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = PathBuf::from("/tmp/explicit.yaml");
        assert_eq!(Config::config_path(Some(&path)).unwrap(), path);
    }
}
