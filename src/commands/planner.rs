//! Drives a board page through the overlay bridge on behalf of the CLI.
//!
//! A [`Planner`] builds the board page, places the trigger, clicks it and
//! waits for the handshake. Requests then travel the same path the overlay
//! uses: UI port, relay, host listener, REST API, and back.

use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::Url;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::ado::classification::{AreaRoot, PiRow};
use crate::ado::http::{Credentials, HttpTransport, Transport};
use crate::ado::pipeline::PlanningData;
use crate::ado::workitems::TestTagUpdate;
use crate::ado::{AdoClient, AdoContext, Endpoints};
use crate::bridge::{
    HandshakeConfig, HostRuntime, OVERLAY_ROOT_ID, RequestHandler, UiCommand, UiEvent, UiHandle,
};
use crate::config::{ResolvedConfig, ResolvedState};
use crate::inject::{
    HostPage, Injection, PageEvent, PageModel, TRIGGER_ANCHOR, ensure_trigger_present,
};
use crate::{Error, Result};

/// How long `open` waits for the host to navigate.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// How long to wait for the handshake: every ping attempt plus one interval.
fn handshake_deadline(handshake: &HandshakeConfig) -> Duration {
    handshake
        .interval
        .checked_mul(handshake.max_attempts.saturating_add(1))
        .unwrap_or(Duration::MAX)
}

/// Board page path for `org` and `project`.
pub fn board_path(org: &str, project: &str) -> String {
    format!(
        "/{}/{}/_boards/board",
        utf8_percent_encode(org, PATH_SEGMENT),
        utf8_percent_encode(project, PATH_SEGMENT)
    )
}

/// Program increments with the ones picked for today.
#[derive(Debug, Clone, PartialEq)]
pub struct PiMeta {
    pub intervals: Vec<PiRow>,
    pub current: Option<String>,
    pub next: Option<String>,
}

/// A connected overlay session on an in-process board page.
pub struct Planner {
    page: Arc<PageModel>,
    ui: UiHandle,
    runtime: JoinHandle<()>,
}

impl Planner {
    /// Connect over HTTPS with the resolved organization, project and token.
    pub async fn connect(config: &ResolvedConfig, state: &ResolvedState) -> Result<Self> {
        let credentials = match state.token() {
            Some(token) => Credentials::Pat(token.to_string()),
            None => {
                tracing::warn!("no personal access token configured, sending anonymous requests");
                Credentials::Anonymous
            }
        };
        let transport = HttpTransport::new(credentials)?;
        Self::with_transport(Arc::new(transport), config).await
    }

    /// Connect using `transport` for every REST call.
    pub async fn with_transport(
        transport: Arc<dyn Transport>,
        config: &ResolvedConfig,
    ) -> Result<Self> {
        let org = config.organization().ok_or_else(|| {
            Error::NotConfigured(
                "organization (use --org, SP_ORGANIZATION or `sp config set organization`)"
                    .to_string(),
            )
        })?;
        let project = config.project().ok_or_else(|| {
            Error::NotConfigured(
                "project (use --project, SP_PROJECT or `sp config set project`)".to_string(),
            )
        })?;
        let endpoints = Endpoints::new(config.base_url())?;

        let page = Arc::new(PageModel::new(board_path(org, project)));
        page.add_anchor(TRIGGER_ANCHOR);
        let host_page: Arc<dyn HostPage> = page.clone();

        let injection = ensure_trigger_present(Arc::clone(&host_page), config.injection_config());
        if let Injection::Watching(watch) = injection {
            if !watch.wait().await.is_injected() {
                return Err(Error::Bridge("trigger could not be placed".to_string()));
            }
        }
        Self::attach(page, host_page, transport, endpoints, config).await
    }

    async fn attach(
        page: Arc<PageModel>,
        host_page: Arc<dyn HostPage>,
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        config: &ResolvedConfig,
    ) -> Result<Self> {
        let ctx = AdoContext::from_page_path(&host_page.location_path()).ok_or_else(|| {
            Error::Bridge(format!(
                "cannot resolve organization and project from {}",
                host_page.location_path()
            ))
        })?;
        tracing::info!(org = %ctx.org, project = %ctx.project, "connecting planner");

        let client = AdoClient::new(transport, endpoints);
        let handler = Arc::new(RequestHandler::new(
            client,
            ctx,
            Arc::clone(&host_page),
            config.host_settings(),
        ));
        let handshake = config.handshake_config();
        let runtime = HostRuntime::new(Arc::clone(&host_page), handler, handshake);
        let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
        let runtime = tokio::spawn(runtime.run(ui_tx));

        let trigger_id = config.injection_config().trigger_id;
        if !page.click(&trigger_id) {
            page.unload();
            return Err(Error::Bridge("trigger is not on the page".to_string()));
        }
        let Some(mut ui) = ui_rx.recv().await else {
            page.unload();
            return Err(Error::Bridge("overlay did not open".to_string()));
        };

        match tokio::time::timeout(handshake_deadline(&handshake), ui.connected()).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                page.unload();
                let _ = runtime.await;
                return Err(Error::Bridge("handshake with the host timed out".to_string()));
            }
        }
        tracing::debug!("planner connected");

        Ok(Self { page, ui, runtime })
    }

    fn send(&self, command: UiCommand) -> Result<()> {
        if self.ui.send(command) {
            Ok(())
        } else {
            Err(Error::Bridge("relay is gone".to_string()))
        }
    }

    /// Next reply; an error reply becomes `Err`.
    async fn next_reply(&mut self) -> Result<UiEvent> {
        loop {
            match self.ui.recv().await {
                None => return Err(Error::Bridge("relay closed before replying".to_string())),
                Some(UiEvent::Connected) => continue,
                Some(UiEvent::Error(error)) => {
                    let mut message = format!("{} ({})", error.message, error.source);
                    if let Some(detail) = error.detail {
                        message.push_str(": ");
                        message.push_str(&detail);
                    }
                    return Err(Error::Bridge(message));
                }
                Some(event) => return Ok(event),
            }
        }
    }

    /// Area roots and the configured favorites among them.
    pub async fn areas(&mut self) -> Result<(Vec<AreaRoot>, Vec<String>)> {
        self.send(UiCommand::RequestAreas)?;
        let mut areas = None;
        loop {
            match self.next_reply().await? {
                UiEvent::Areas(found) => areas = Some(found),
                UiEvent::AreaFavorites(favorites) => {
                    return Ok((areas.unwrap_or_default(), favorites));
                }
                other => tracing::debug!(?other, "ignoring reply"),
            }
        }
    }

    pub async fn iterations(&mut self) -> Result<PiMeta> {
        self.send(UiCommand::RequestIterations)?;
        loop {
            if let UiEvent::PiMeta {
                meta,
                current,
                next,
            } = self.next_reply().await?
            {
                return Ok(PiMeta {
                    intervals: meta,
                    current,
                    next,
                });
            }
        }
    }

    pub async fn data(&mut self, area_root: &str, pi_root: &str) -> Result<PlanningData> {
        self.send(UiCommand::RequestData {
            area_root: area_root.to_string(),
            pi_root: pi_root.to_string(),
        })?;
        loop {
            if let UiEvent::Data(payload) = self.next_reply().await? {
                return Ok(payload);
            }
        }
    }

    async fn wait_updated(&mut self, id: u64) -> Result<()> {
        loop {
            match self.next_reply().await? {
                UiEvent::Updated { id: updated } if updated == id => return Ok(()),
                other => tracing::debug!(?other, "ignoring reply"),
            }
        }
    }

    pub async fn set_iteration(&mut self, id: u64, iteration_path: &str) -> Result<()> {
        self.send(UiCommand::SetIteration {
            id,
            iteration_path: iteration_path.to_string(),
        })?;
        self.wait_updated(id).await
    }

    pub async fn set_tests(&mut self, update: TestTagUpdate) -> Result<()> {
        let id = update.id;
        self.send(UiCommand::SetTests(update))?;
        self.wait_updated(id).await
    }

    /// Ask the host to open a work item; returns the URL it navigated to.
    pub async fn open_work_item(&mut self, id: u64) -> Result<Url> {
        let mut events = self.page.subscribe();
        self.send(UiCommand::OpenWorkItem { id })?;
        let navigated = async {
            loop {
                match events.recv().await {
                    Ok(PageEvent::Navigated { url }) => return Some(url),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        match tokio::time::timeout(OPEN_TIMEOUT, navigated).await {
            Ok(Some(url)) => Ok(url),
            Ok(None) | Err(_) => Err(Error::Bridge(format!("work item {} was not opened", id))),
        }
    }

    /// Close the overlay, tear the page down and wait for the host runtime.
    pub async fn shutdown(self) {
        self.page.click(OVERLAY_ROOT_ID);
        self.page.unload();
        if let Err(e) = self.runtime.await {
            tracing::warn!(error = %e, "host runtime failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolver::resolve_config_with_env;
    use crate::config::{ConfigOverrides, SpConfig};
    use crate::test_utils::{MockTransport, server_error};
    use reqwest::Method;
    use serde_json::json;

    fn config() -> ResolvedConfig {
        let file = SpConfig {
            organization: Some("contoso".to_string()),
            project: Some("Fabrikam Fiber".to_string()),
            base_url: Some("http://ado.test".to_string()),
            favorite_areas: vec!["Ops".to_string()],
            ..SpConfig::default()
        };
        resolve_config_with_env(&file, &ConfigOverrides::new(), |_| None)
    }

    #[test]
    fn test_board_path_encodes_segments() {
        assert_eq!(
            board_path("contoso", "Fabrikam Fiber"),
            "/contoso/Fabrikam%20Fiber/_boards/board"
        );
        assert_eq!(
            AdoContext::from_page_path(&board_path("contoso", "A/B")),
            Some(AdoContext::new("contoso", "A/B"))
        );
    }

    #[test]
    fn test_handshake_deadline_saturates() {
        let normal = HandshakeConfig {
            interval: Duration::from_millis(250),
            max_attempts: 20,
        };
        assert_eq!(handshake_deadline(&normal), Duration::from_millis(5250));

        let most_attempts = HandshakeConfig {
            interval: Duration::from_millis(250),
            max_attempts: u32::MAX,
        };
        assert_eq!(
            handshake_deadline(&most_attempts),
            Duration::from_millis(250) * u32::MAX
        );

        let longest_interval = HandshakeConfig {
            interval: Duration::from_millis(u64::MAX),
            max_attempts: 20,
        };
        assert_eq!(handshake_deadline(&longest_interval), Duration::MAX);
    }

    #[test]
    fn test_largest_handshake_settings_parse() {
        let doc: kdl::KdlDocument =
            "handshake-max-attempts 4294967295\nhandshake-interval-ms 18446744073709551615\n"
                .parse()
                .unwrap();
        let file = SpConfig::from_kdl(&doc);
        assert_eq!(file.handshake_max_attempts, Some(u32::MAX));
        let resolved = resolve_config_with_env(&file, &ConfigOverrides::new(), |_| None);
        assert_eq!(handshake_deadline(&resolved.handshake_config()), Duration::MAX);
    }

    #[tokio::test]
    async fn test_requires_organization() {
        let err = Planner::with_transport(Arc::new(MockTransport::new()), &ResolvedConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_areas_round_trip_through_bridge() {
        let mock = MockTransport::new().on(Method::GET, "/classificationnodes/areas", |call| {
            assert!(call.url.path().starts_with("/contoso/Fabrikam%20Fiber/"));
            Ok(json!({"name": "Fabrikam Fiber", "children": [{"name": "Web"}, {"name": "Ops"}]}))
        });
        let mut planner = Planner::with_transport(Arc::new(mock), &config()).await.unwrap();
        let (areas, favorites) = planner.areas().await.unwrap();
        planner.shutdown().await;

        let names: Vec<_> = areas.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Web", "Ops"]);
        assert_eq!(favorites, vec!["Ops"]);
    }

    #[tokio::test]
    async fn test_error_reply_becomes_error() {
        let mock = MockTransport::new().on(Method::PATCH, "/workitems/7", |_| Err(server_error()));
        let mut planner = Planner::with_transport(Arc::new(mock), &config()).await.unwrap();
        let err = planner.set_iteration(7, "Fabrikam Fiber\\PI 1").await.unwrap_err();
        planner.shutdown().await;

        let message = err.to_string();
        assert!(message.contains("set-iteration"), "{}", message);
        assert!(message.contains("boom"), "{}", message);
    }

    #[tokio::test]
    async fn test_open_work_item_returns_edit_url() {
        let mut planner = Planner::with_transport(Arc::new(MockTransport::new()), &config())
            .await
            .unwrap();
        let url = planner.open_work_item(12).await.unwrap();
        planner.shutdown().await;
        assert_eq!(
            url.as_str(),
            "http://ado.test/contoso/Fabrikam%20Fiber/_workitems/edit/12"
        );
    }
}
