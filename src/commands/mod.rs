//! Command implementations for the Sprintplanner CLI.
//!
//! Board commands (`areas`, `iterations`, `data`, `set-iteration`,
//! `set-tests`, `open`) go through a [`planner::Planner`]. Config commands
//! read and write the KDL files directly.

pub mod planner;

use serde::Serialize;

use crate::ado::classification::{AreaRoot, PiRow};
use crate::ado::mappers::{FeatureDto, StoryDto};
use crate::ado::workitems::TestTagUpdate;
use crate::config::{
    ConfigOverrides, ConfigStore, Resolved, ResolvedConfig, ResolvedState, SpState, ValueSource,
    resolve_config, resolve_state,
};
use crate::{Error, Result};
use planner::Planner;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    fn to_json(&self) -> String;
    fn to_human(&self) -> String;
}

fn json_of<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

/// Resolved configuration and token for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub store: ConfigStore,
    pub config: ResolvedConfig,
    pub state: ResolvedState,
}

impl Settings {
    pub fn load(store: ConfigStore, overrides: &ConfigOverrides) -> Result<Self> {
        let config = resolve_config(&store.load_config()?, overrides);
        let state = resolve_state(&store.load_state()?, overrides);
        Ok(Self {
            store,
            config,
            state,
        })
    }
}

async fn connect(settings: &Settings) -> Result<Planner> {
    Planner::connect(&settings.config, &settings.state).await
}

// === Areas ===

#[derive(Serialize)]
pub struct AreasResult {
    pub areas: Vec<AreaRoot>,
    pub favorites: Vec<String>,
}

impl Output for AreasResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        if self.areas.is_empty() {
            return "No areas found.".to_string();
        }
        let mut lines = vec![format!("{} area(s):", self.areas.len())];
        for area in &self.areas {
            let star = if self.favorites.iter().any(|f| f == &area.id || f == &area.name) {
                "*"
            } else {
                " "
            };
            lines.push(format!(" {} {}", star, area.id));
        }
        if !self.favorites.is_empty() {
            lines.push(String::new());
            lines.push(format!("Favorites: {}", self.favorites.join(", ")));
        }
        lines.join("\n")
    }
}

pub async fn areas(settings: &Settings) -> Result<AreasResult> {
    let mut planner = connect(settings).await?;
    let result = planner.areas().await;
    planner.shutdown().await;
    let (areas, favorites) = result?;
    Ok(AreasResult { areas, favorites })
}

// === Iterations ===

#[derive(Serialize)]
pub struct IterationsResult {
    pub current: Option<String>,
    pub next: Option<String>,
    pub intervals: Vec<PiRow>,
}

impl Output for IterationsResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        if self.intervals.is_empty() {
            return "No program increments found.".to_string();
        }
        let date = |d: &Option<chrono::DateTime<chrono::Utc>>| {
            d.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "?".to_string())
        };
        let mut lines = Vec::new();
        for row in &self.intervals {
            let marker = if self.current.as_ref() == Some(&row.root) {
                " (current)"
            } else if self.next.as_ref() == Some(&row.root) {
                " (next)"
            } else {
                ""
            };
            lines.push(format!(
                "{}  {} .. {}  {} sprint(s){}",
                row.root,
                date(&row.start),
                date(&row.finish),
                row.sprint_names.len(),
                marker
            ));
        }
        lines.join("\n")
    }
}

pub async fn iterations(settings: &Settings) -> Result<IterationsResult> {
    let mut planner = connect(settings).await?;
    let result = planner.iterations().await;
    planner.shutdown().await;
    let meta = result?;
    Ok(IterationsResult {
        current: meta.current,
        next: meta.next,
        intervals: meta.intervals,
    })
}

// === Data ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResult {
    pub area_root: String,
    pub pi_root: String,
    pub features: Vec<FeatureDto>,
    pub stories: Vec<StoryDto>,
}

impl Output for DataResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "{} feature(s), {} story(ies) under {} in {}",
            self.features.len(),
            self.stories.len(),
            self.area_root,
            self.pi_root
        )];
        for feature in &self.features {
            lines.push(format!(
                "#{} [{}] {}  ({})",
                feature.id, feature.state, feature.title, feature.iteration_path
            ));
            for story in self.stories.iter().filter(|s| s.parent_id == feature.id) {
                lines.push(format!(
                    "    #{} [{}] {}  ({})",
                    story.id, story.state, story.title, story.iteration_path
                ));
            }
        }
        lines.join("\n")
    }
}

/// Features and stories under `area_root`. Without `pi_root` the current
/// program increment is used.
pub async fn data(settings: &Settings, area_root: &str, pi_root: Option<&str>) -> Result<DataResult> {
    let mut planner = connect(settings).await?;
    let result = fetch_data(&mut planner, area_root, pi_root).await;
    planner.shutdown().await;
    result
}

async fn fetch_data(planner: &mut Planner, area_root: &str, pi_root: Option<&str>) -> Result<DataResult> {
    let pi_root = match pi_root {
        Some(root) => root.to_string(),
        None => planner
            .iterations()
            .await?
            .current
            .ok_or_else(|| Error::Other("No current program increment, pass --pi".to_string()))?,
    };
    let payload = planner.data(area_root, &pi_root).await?;
    Ok(DataResult {
        area_root: area_root.to_string(),
        pi_root,
        features: payload.features,
        stories: payload.stories,
    })
}

// === Updates ===

#[derive(Serialize)]
pub struct UpdatedResult {
    pub id: u64,
    pub field: &'static str,
    pub value: String,
}

impl Output for UpdatedResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        format!("Updated #{}: {} = {}", self.id, self.field, self.value)
    }
}

pub async fn set_iteration(settings: &Settings, id: u64, iteration_path: &str) -> Result<UpdatedResult> {
    let mut planner = connect(settings).await?;
    let result = planner.set_iteration(id, iteration_path).await;
    planner.shutdown().await;
    result?;
    Ok(UpdatedResult {
        id,
        field: "iterationPath",
        value: iteration_path.to_string(),
    })
}

pub async fn set_tests(settings: &Settings, id: u64, sit: bool, uat: bool, e2e: bool) -> Result<UpdatedResult> {
    let update = TestTagUpdate {
        id,
        sit,
        uat,
        e2e,
        ..TestTagUpdate::default()
    };
    let mut planner = connect(settings).await?;
    let result = planner.set_tests(update).await;
    planner.shutdown().await;
    result?;

    let host = settings.config.host_settings();
    let selected: Vec<&str> = [(sit, &host.sit_tag), (uat, &host.uat_tag), (e2e, &host.e2e_tag)]
        .into_iter()
        .filter(|(on, _)| *on)
        .map(|(_, tag)| tag.as_str())
        .collect();
    Ok(UpdatedResult {
        id,
        field: "tests",
        value: selected.join("; "),
    })
}

// === Open ===

#[derive(Serialize)]
pub struct OpenResult {
    pub id: u64,
    pub url: String,
}

impl Output for OpenResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        self.url.clone()
    }
}

pub async fn open(settings: &Settings, id: u64) -> Result<OpenResult> {
    let mut planner = connect(settings).await?;
    let result = planner.open_work_item(id).await;
    planner.shutdown().await;
    let url = result?;
    Ok(OpenResult {
        id,
        url: url.to_string(),
    })
}

// === Config ===

#[derive(Serialize)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: Option<String>,
    pub source: Option<String>,
}

impl ConfigEntry {
    fn resolved<T: ToString>(key: &'static str, resolved: &Resolved<T>) -> Self {
        Self {
            key,
            value: Some(resolved.value.to_string()),
            source: Some(resolved.source.to_string()),
        }
    }

    fn optional(key: &'static str, resolved: Option<&Resolved<String>>) -> Self {
        Self {
            key,
            value: resolved.map(|r| r.value.clone()),
            source: resolved.map(|r| r.source.to_string()),
        }
    }
}

#[derive(Serialize)]
pub struct ConfigShowResult {
    pub config_path: String,
    pub state_path: String,
    pub values: Vec<ConfigEntry>,
}

impl Output for ConfigShowResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        let width = self.values.iter().map(|e| e.key.len()).max().unwrap_or(0);
        let mut lines = vec![
            format!("config: {}", self.config_path),
            format!("state:  {}", self.state_path),
            String::new(),
        ];
        for entry in &self.values {
            let value = entry.value.as_deref().unwrap_or("(not set)");
            match entry.source {
                Some(ref source) => lines.push(format!("{:width$}  {}  [{}]", entry.key, value, source)),
                None => lines.push(format!("{:width$}  {}", entry.key, value)),
            }
        }
        lines.join("\n")
    }
}

/// Effective configuration; the token is masked.
pub fn config_show(settings: &Settings) -> ConfigShowResult {
    let c = &settings.config;
    let favorites = Resolved::new(c.favorite_areas.value.join(", "), c.favorite_areas.source.clone());
    let token = ConfigEntry {
        key: "ado-token",
        value: settings.state.masked_token(),
        source: settings.state.token_source().map(ValueSource::to_string),
    };
    ConfigShowResult {
        config_path: settings.store.config_path().display().to_string(),
        state_path: settings.store.state_path().display().to_string(),
        values: vec![
            ConfigEntry::optional("organization", c.organization.as_ref()),
            ConfigEntry::optional("project", c.project.as_ref()),
            ConfigEntry::resolved("base-url", &c.base_url),
            ConfigEntry::resolved("output-format", &c.output_format),
            ConfigEntry::resolved("sit-tag", &c.sit_tag),
            ConfigEntry::resolved("uat-tag", &c.uat_tag),
            ConfigEntry::resolved("e2e-tag", &c.e2e_tag),
            ConfigEntry::resolved("favorite-area", &favorites),
            ConfigEntry::resolved("handshake-interval-ms", &c.handshake_interval_ms),
            ConfigEntry::resolved("handshake-max-attempts", &c.handshake_max_attempts),
            ConfigEntry::resolved("inject-interval-ms", &c.inject_interval_ms),
            ConfigEntry::resolved("inject-max-retries", &c.inject_max_retries),
            token,
        ],
    }
}

#[derive(Serialize)]
pub struct ConfigSetResult {
    pub key: String,
    pub value: String,
    pub path: String,
}

impl Output for ConfigSetResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {} in {}", self.key, self.value, self.path)
    }
}

pub fn config_set(store: &ConfigStore, key: &str, value: &str) -> Result<ConfigSetResult> {
    let mut config = store.load_config()?;
    config.set(key, value).map_err(Error::Config)?;
    store.save_config(&config)?;
    Ok(ConfigSetResult {
        key: key.to_string(),
        value: value.to_string(),
        path: store.config_path().display().to_string(),
    })
}

#[derive(Serialize)]
pub struct TokenResult {
    pub stored: bool,
    pub token: Option<String>,
    pub path: String,
}

impl Output for TokenResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        match self.token {
            Some(ref masked) => format!("Stored token {} in {}", masked, self.path),
            None => format!("Removed token from {}", self.path),
        }
    }
}

pub fn config_set_token(store: &ConfigStore, token: &str) -> Result<TokenResult> {
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::Config("token must not be empty".to_string()));
    }
    let state = SpState {
        ado_token: Some(token.to_string()),
    };
    store.save_state(&state)?;
    Ok(TokenResult {
        stored: true,
        token: Some(crate::config::schema::mask_secret(token)),
        path: store.state_path().display().to_string(),
    })
}

pub fn config_clear_token(store: &ConfigStore) -> Result<TokenResult> {
    store.save_state(&SpState::default())?;
    Ok(TokenResult {
        stored: false,
        token: None,
        path: store.state_path().display().to_string(),
    })
}

// === Version ===

#[derive(Serialize)]
pub struct VersionResult {
    pub version: &'static str,
    pub commit: &'static str,
    pub built: &'static str,
}

impl Output for VersionResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Version: {}\nCommit:  {}\nBuilt:   {}",
            self.version, self.commit, self.built
        )
    }
}

pub fn version() -> VersionResult {
    VersionResult {
        version: crate::cli::package_version(),
        commit: crate::cli::git_commit(),
        built: crate::cli::build_timestamp(),
    }
}
