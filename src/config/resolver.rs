//! Configuration resolution with precedence handling.
//!
//! Resolves effective values from multiple sources with precedence:
//! 1. CLI flags (highest priority)
//! 2. Environment variables
//! 3. config.kdl / state.kdl
//! 4. Built-in defaults (lowest priority)
//!
//! Each resolved value remembers where it came from so `sp config show`
//! can report it.

use std::time::Duration;

use super::schema::{OutputFormat, SpConfig, SpState, mask_secret};
use crate::ado::DEFAULT_BASE_URL;
use crate::bridge::host::{DEFAULT_E2E_TAG, DEFAULT_SIT_TAG, DEFAULT_UAT_TAG};
use crate::bridge::session::{DEFAULT_HANDSHAKE_INTERVAL, DEFAULT_HANDSHAKE_MAX_ATTEMPTS};
use crate::bridge::{HandshakeConfig, HostSettings};
use crate::inject::InjectionConfig;
use crate::inject::watcher::{DEFAULT_INJECT_INTERVAL, DEFAULT_INJECT_MAX_RETRIES};

/// Environment variable for the organization.
pub const ORG_ENV: &str = "SP_ORGANIZATION";
/// Environment variable for the project.
pub const PROJECT_ENV: &str = "SP_PROJECT";
/// Environment variable for the service root.
pub const BASE_URL_ENV: &str = "SP_BASE_URL";
/// Environment variable for the personal access token.
pub const TOKEN_ENV: &str = "SP_ADO_TOKEN";

/// Source of a resolved configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value came from an environment variable.
    EnvVar(String),
    /// Value came from config.kdl or state.kdl.
    File,
    /// Value came from a CLI flag.
    CliFlag,
    /// Value is the built-in default.
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::File => write!(f, "file"),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved configuration value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }

    fn default_value(value: T) -> Self {
        Self::new(value, ValueSource::Default)
    }
}

/// Values passed on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub organization: Option<String>,
    pub project: Option<String>,
    pub base_url: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub token: Option<String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Effective configuration after applying precedence rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub organization: Option<Resolved<String>>,
    pub project: Option<Resolved<String>>,
    pub base_url: Resolved<String>,
    pub output_format: Resolved<OutputFormat>,
    pub sit_tag: Resolved<String>,
    pub uat_tag: Resolved<String>,
    pub e2e_tag: Resolved<String>,
    pub favorite_areas: Resolved<Vec<String>>,
    pub handshake_interval_ms: Resolved<u64>,
    pub handshake_max_attempts: Resolved<u32>,
    pub inject_interval_ms: Resolved<u64>,
    pub inject_max_retries: Resolved<u32>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            organization: None,
            project: None,
            base_url: Resolved::default_value(DEFAULT_BASE_URL.to_string()),
            output_format: Resolved::default_value(OutputFormat::default()),
            sit_tag: Resolved::default_value(DEFAULT_SIT_TAG.to_string()),
            uat_tag: Resolved::default_value(DEFAULT_UAT_TAG.to_string()),
            e2e_tag: Resolved::default_value(DEFAULT_E2E_TAG.to_string()),
            favorite_areas: Resolved::default_value(Vec::new()),
            handshake_interval_ms: Resolved::default_value(
                DEFAULT_HANDSHAKE_INTERVAL.as_millis() as u64,
            ),
            handshake_max_attempts: Resolved::default_value(DEFAULT_HANDSHAKE_MAX_ATTEMPTS),
            inject_interval_ms: Resolved::default_value(DEFAULT_INJECT_INTERVAL.as_millis() as u64),
            inject_max_retries: Resolved::default_value(DEFAULT_INJECT_MAX_RETRIES),
        }
    }
}

impl ResolvedConfig {
    pub fn organization(&self) -> Option<&str> {
        self.organization.as_ref().map(|r| r.value.as_str())
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_ref().map(|r| r.value.as_str())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url.value
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }

    /// Tag literals and favorites for the request handler.
    pub fn host_settings(&self) -> HostSettings {
        HostSettings {
            sit_tag: self.sit_tag.value.clone(),
            uat_tag: self.uat_tag.value.clone(),
            e2e_tag: self.e2e_tag.value.clone(),
            favorites: self.favorite_areas.value.clone(),
        }
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            interval: Duration::from_millis(self.handshake_interval_ms.value),
            max_attempts: self.handshake_max_attempts.value,
        }
    }

    pub fn injection_config(&self) -> InjectionConfig {
        InjectionConfig {
            interval: Duration::from_millis(self.inject_interval_ms.value),
            max_retries: self.inject_max_retries.value,
            ..InjectionConfig::default()
        }
    }
}

/// Effective secrets after applying precedence rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedState {
    pub ado_token: Option<Resolved<String>>,
}

impl ResolvedState {
    pub fn token(&self) -> Option<&str> {
        self.ado_token.as_ref().map(|r| r.value.as_str())
    }

    pub fn has_token(&self) -> bool {
        self.ado_token.is_some()
    }

    pub fn masked_token(&self) -> Option<String> {
        self.token().map(mask_secret)
    }

    pub fn token_source(&self) -> Option<&ValueSource> {
        self.ado_token.as_ref().map(|r| &r.source)
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Pick CLI, then the named env var (when set and non-empty), then the file value.
fn pick_string(
    cli: Option<&String>,
    env_name: &str,
    env: &impl Fn(&str) -> Option<String>,
    file: Option<&String>,
) -> Option<Resolved<String>> {
    if let Some(value) = cli {
        Some(Resolved::new(value.clone(), ValueSource::CliFlag))
    } else if let Some(value) = env(env_name).filter(|v| !v.is_empty()) {
        Some(Resolved::new(value, ValueSource::EnvVar(env_name.to_string())))
    } else {
        file.map(|value| Resolved::new(value.clone(), ValueSource::File))
    }
}

fn from_file<T>(file: Option<T>, fallback: Resolved<T>) -> Resolved<T> {
    match file {
        Some(value) => Resolved::new(value, ValueSource::File),
        None => fallback,
    }
}

/// Resolve the effective configuration from the process environment.
pub fn resolve_config(config: &SpConfig, overrides: &ConfigOverrides) -> ResolvedConfig {
    resolve_config_with_env(config, overrides, env_lookup)
}

/// Resolve the effective configuration with an explicit environment lookup.
pub fn resolve_config_with_env(
    config: &SpConfig,
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let defaults = ResolvedConfig::default();

    let organization = pick_string(
        overrides.organization.as_ref(),
        ORG_ENV,
        &env,
        config.organization.as_ref(),
    );
    let project = pick_string(
        overrides.project.as_ref(),
        PROJECT_ENV,
        &env,
        config.project.as_ref(),
    );
    let base_url = pick_string(
        overrides.base_url.as_ref(),
        BASE_URL_ENV,
        &env,
        config.base_url.as_ref(),
    )
    .unwrap_or(defaults.base_url);

    let output_format = if let Some(format) = overrides.output_format {
        Resolved::new(format, ValueSource::CliFlag)
    } else {
        from_file(config.output_format, defaults.output_format)
    };

    let favorite_areas = if config.favorite_areas.is_empty() {
        defaults.favorite_areas
    } else {
        Resolved::new(config.favorite_areas.clone(), ValueSource::File)
    };

    ResolvedConfig {
        organization,
        project,
        base_url,
        output_format,
        sit_tag: from_file(config.sit_tag.clone(), defaults.sit_tag),
        uat_tag: from_file(config.uat_tag.clone(), defaults.uat_tag),
        e2e_tag: from_file(config.e2e_tag.clone(), defaults.e2e_tag),
        favorite_areas,
        handshake_interval_ms: from_file(config.handshake_interval_ms, defaults.handshake_interval_ms),
        handshake_max_attempts: from_file(
            config.handshake_max_attempts,
            defaults.handshake_max_attempts,
        ),
        inject_interval_ms: from_file(config.inject_interval_ms, defaults.inject_interval_ms),
        inject_max_retries: from_file(config.inject_max_retries, defaults.inject_max_retries),
    }
}

/// Resolve the token from the process environment.
pub fn resolve_state(state: &SpState, overrides: &ConfigOverrides) -> ResolvedState {
    resolve_state_with_env(state, overrides, env_lookup)
}

/// Resolve the token: CLI flag, then `SP_ADO_TOKEN`, then state.kdl.
pub fn resolve_state_with_env(
    state: &SpState,
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedState {
    ResolvedState {
        ado_token: pick_string(
            overrides.token.as_ref(),
            TOKEN_ENV,
            &env,
            state.ado_token.as_ref(),
        ),
    }
}
