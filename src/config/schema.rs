//! KDL schema definitions for config.kdl and state.kdl.

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

use crate::ado::Endpoints;

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keys accepted by `sp config set`.
pub const CONFIG_KEYS: [&str; 12] = [
    "organization",
    "project",
    "base-url",
    "output-format",
    "sit-tag",
    "uat-tag",
    "e2e-tag",
    "favorite-area",
    "handshake-interval-ms",
    "handshake-max-attempts",
    "inject-interval-ms",
    "inject-max-retries",
];

/// User preferences stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// organization "contoso"
/// project "Fabrikam Fiber"
/// base-url "https://dev.azure.com"
/// output-format "human"
/// sit-tag "SIT"
/// uat-tag "UAT"
/// e2e-tag "E2E"
/// favorite-area "Fabrikam Fiber\\Checkout"
/// favorite-area "Fabrikam Fiber\\Payments"
/// handshake-interval-ms 250
/// handshake-max-attempts 20
/// inject-interval-ms 500
/// inject-max-retries 30
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpConfig {
    pub organization: Option<String>,
    pub project: Option<String>,
    pub base_url: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub sit_tag: Option<String>,
    pub uat_tag: Option<String>,
    pub e2e_tag: Option<String>,
    /// Area roots surfaced as favorites, in order.
    pub favorite_areas: Vec<String>,
    pub handshake_interval_ms: Option<u64>,
    pub handshake_max_attempts: Option<u32>,
    pub inject_interval_ms: Option<u64>,
    pub inject_max_retries: Option<u32>,
}

fn first_string(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)?
        .entries()
        .first()?
        .value()
        .as_string()
        .map(str::to_string)
}

fn first_integer(doc: &KdlDocument, name: &str) -> Option<i128> {
    doc.get(name)?.entries().first()?.value().as_integer()
}

fn push_string(doc: &mut KdlDocument, name: &str, value: &str) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    doc.nodes_mut().push(node);
}

fn push_integer(doc: &mut KdlDocument, name: &str, value: i128) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::Integer(value)));
    doc.nodes_mut().push(node);
}

fn parse_positive<T: TryFrom<u64>>(key: &str, raw: &str) -> Result<T, String> {
    let n: u64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{} must be a positive integer, got '{}'", key, raw))?;
    if n == 0 {
        return Err(format!("{} must be greater than 0", key));
    }
    T::try_from(n).map_err(|_| format!("{} is too large: {}", key, n))
}

impl SpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref url) = self.base_url {
            if let Err(e) = Endpoints::new(url) {
                return Err(e.to_string());
            }
        }
        let positive = [
            ("handshake-interval-ms", self.handshake_interval_ms),
            ("handshake-max-attempts", self.handshake_max_attempts.map(u64::from)),
            ("inject-interval-ms", self.inject_interval_ms),
            ("inject-max-retries", self.inject_max_retries.map(u64::from)),
        ];
        for (key, value) in positive {
            if value == Some(0) {
                return Err(format!("{} must be greater than 0", key));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        config.organization = first_string(doc, "organization");
        config.project = first_string(doc, "project");
        config.base_url = first_string(doc, "base-url");
        config.output_format = first_string(doc, "output-format").and_then(|s| OutputFormat::parse(&s));
        config.sit_tag = first_string(doc, "sit-tag");
        config.uat_tag = first_string(doc, "uat-tag");
        config.e2e_tag = first_string(doc, "e2e-tag");

        // favorite-area may repeat
        config.favorite_areas = doc
            .nodes()
            .iter()
            .filter(|node| node.name().value() == "favorite-area")
            .filter_map(|node| node.entries().first())
            .filter_map(|entry| entry.value().as_string())
            .map(str::to_string)
            .collect();

        config.handshake_interval_ms =
            first_integer(doc, "handshake-interval-ms").and_then(|i| u64::try_from(i).ok());
        config.handshake_max_attempts =
            first_integer(doc, "handshake-max-attempts").and_then(|i| u32::try_from(i).ok());
        config.inject_interval_ms =
            first_integer(doc, "inject-interval-ms").and_then(|i| u64::try_from(i).ok());
        config.inject_max_retries =
            first_integer(doc, "inject-max-retries").and_then(|i| u32::try_from(i).ok());

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        let strings = [
            ("organization", self.organization.as_deref()),
            ("project", self.project.as_deref()),
            ("base-url", self.base_url.as_deref()),
            ("output-format", self.output_format.as_ref().map(OutputFormat::as_str)),
            ("sit-tag", self.sit_tag.as_deref()),
            ("uat-tag", self.uat_tag.as_deref()),
            ("e2e-tag", self.e2e_tag.as_deref()),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                push_string(&mut doc, name, value);
            }
        }

        for area in &self.favorite_areas {
            push_string(&mut doc, "favorite-area", area);
        }

        let integers = [
            ("handshake-interval-ms", self.handshake_interval_ms),
            ("handshake-max-attempts", self.handshake_max_attempts.map(u64::from)),
            ("inject-interval-ms", self.inject_interval_ms),
            ("inject-max-retries", self.inject_max_retries.map(u64::from)),
        ];
        for (name, value) in integers {
            if let Some(value) = value {
                push_integer(&mut doc, name, i128::from(value));
            }
        }

        doc
    }

    /// Set one key from its string form, as given to `sp config set`.
    ///
    /// `favorite-area` takes a comma-separated list and replaces the current
    /// favorites; an empty value clears them.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let text = || Some(value.to_string());
        match key {
            "organization" => self.organization = text(),
            "project" => self.project = text(),
            "base-url" => {
                Endpoints::new(value).map_err(|e| e.to_string())?;
                self.base_url = text();
            }
            "output-format" => {
                let format = OutputFormat::parse(value)
                    .ok_or_else(|| format!("output-format must be json or human, got '{}'", value))?;
                self.output_format = Some(format);
            }
            "sit-tag" => self.sit_tag = text(),
            "uat-tag" => self.uat_tag = text(),
            "e2e-tag" => self.e2e_tag = text(),
            "favorite-area" => {
                self.favorite_areas = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "handshake-interval-ms" => self.handshake_interval_ms = Some(parse_positive(key, value)?),
            "handshake-max-attempts" => {
                self.handshake_max_attempts = Some(parse_positive(key, value)?)
            }
            "inject-interval-ms" => self.inject_interval_ms = Some(parse_positive(key, value)?),
            "inject-max-retries" => self.inject_max_retries = Some(parse_positive(key, value)?),
            _ => {
                return Err(format!(
                    "unknown config key '{}', expected one of: {}",
                    key,
                    CONFIG_KEYS.join(", ")
                ));
            }
        }
        Ok(())
    }
}

/// Secrets stored in state.kdl.
///
/// **MUST be created with 0600 permissions (owner read/write only)**.
///
/// # KDL Schema
///
/// ```kdl
/// ado-token "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpState {
    /// Azure DevOps personal access token (sensitive!)
    pub ado_token: Option<String>,
}

impl SpState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            ado_token: first_string(doc, "ado-token").filter(|t| !t.is_empty()),
        }
    }

    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        if let Some(ref token) = self.ado_token {
            push_string(&mut doc, "ado-token", token);
        }
        doc
    }
}

/// Required permissions for state.kdl (Unix: 0600, owner read/write only).
#[cfg(unix)]
pub const STATE_FILE_MODE: u32 = 0o600;

/// Mask a secret for display: the first and last four characters of long
/// values, only the first four of short ones.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let head: String = chars.iter().take(4).collect();
    if chars.len() <= 12 {
        format!("{}...", head)
    } else {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}
