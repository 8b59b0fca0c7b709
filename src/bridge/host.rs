//! Host context: serves relay requests against the work item API and owns the
//! page-level session lifecycle.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use super::OVERLAY_ROOT_ID;
use super::mailbox::ReplyTo;
use super::protocol::{ErrorPayload, HostBound, RelayBound, encode};
use super::relay::UiHandle;
use super::session::{HandshakeConfig, Session, SessionState};
use crate::ado::classification::{AreaRoot, flatten_pi_roots, pick_current_and_next};
use crate::ado::pipeline::PlanningData;
use crate::ado::workitems::TestTagUpdate;
use crate::ado::{AdoClient, AdoContext};
use crate::inject::{HostPage, PageEvent, TRIGGER_ID};

/// Default tag literal for system integration testing.
pub const DEFAULT_SIT_TAG: &str = "SIT";

/// Default tag literal for user acceptance testing.
pub const DEFAULT_UAT_TAG: &str = "UAT";

/// Default tag literal for end-to-end testing.
pub const DEFAULT_E2E_TAG: &str = "E2E";

/// User preferences the host applies to requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    pub sit_tag: String,
    pub uat_tag: String,
    pub e2e_tag: String,
    /// Area roots (ids or names) to surface as favorites.
    pub favorites: Vec<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            sit_tag: DEFAULT_SIT_TAG.to_string(),
            uat_tag: DEFAULT_UAT_TAG.to_string(),
            e2e_tag: DEFAULT_E2E_TAG.to_string(),
            favorites: Vec::new(),
        }
    }
}

impl HostSettings {
    /// Fill empty tag literals of `update` with the configured ones.
    fn complete(&self, mut update: TestTagUpdate) -> TestTagUpdate {
        for (literal, fallback) in [
            (&mut update.sit_tag, &self.sit_tag),
            (&mut update.uat_tag, &self.uat_tag),
            (&mut update.e2e_tag, &self.e2e_tag),
        ] {
            if literal.trim().is_empty() {
                *literal = fallback.clone();
            }
        }
        update
    }

    /// Configured favorites present in `areas`, in configured order.
    fn favorites_in(&self, areas: &[AreaRoot]) -> Vec<String> {
        self.favorites
            .iter()
            .filter(|f| areas.iter().any(|a| &a.id == *f || &a.name == *f))
            .cloned()
            .collect()
    }
}

fn error_reply(source: &str, message: &str, detail: impl ToString) -> RelayBound {
    RelayBound::Error {
        error: ErrorPayload::new(source, message).with_detail(detail.to_string()),
    }
}

/// Serves host-bound requests for one organization and project.
pub struct RequestHandler {
    client: AdoClient,
    ctx: AdoContext,
    page: Arc<dyn HostPage>,
    settings: HostSettings,
}

impl RequestHandler {
    pub fn new(
        client: AdoClient,
        ctx: AdoContext,
        page: Arc<dyn HostPage>,
        settings: HostSettings,
    ) -> Self {
        Self {
            client,
            ctx,
            page,
            settings,
        }
    }

    pub fn context(&self) -> &AdoContext {
        &self.ctx
    }

    /// Serve `request` and post every reply to `reply`.
    pub async fn handle(&self, request: HostBound, reply: ReplyTo) {
        for message in self.respond(request).await {
            reply.post(encode(&message));
        }
    }

    /// Replies for `request`, in posting order.
    ///
    /// Failed reads yield an error followed by an empty result so the UI
    /// leaves its loading state; failed writes yield only the error.
    pub async fn respond(&self, request: HostBound) -> Vec<RelayBound> {
        tracing::debug!(?request, "serving request");
        match request {
            HostBound::ReqAreas => match self.client.fetch_area_roots(&self.ctx).await {
                Ok(areas) => {
                    let favorites = self.settings.favorites_in(&areas);
                    vec![
                        RelayBound::Areas { areas },
                        RelayBound::AreaFavorites { favorites },
                    ]
                }
                Err(e) => {
                    tracing::warn!(error = %e, "area fetch failed");
                    vec![
                        error_reply("areas", "Failed to load areas", e),
                        RelayBound::Areas { areas: Vec::new() },
                    ]
                }
            },

            HostBound::ReqIterations => {
                match self.client.fetch_project_iterations(&self.ctx).await {
                    Ok(root) => {
                        let meta = flatten_pi_roots(&root);
                        let (current, next) = pick_current_and_next(&meta, Utc::now());
                        vec![RelayBound::PiMeta {
                            meta,
                            current,
                            next,
                        }]
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "iteration fetch failed");
                        vec![
                            error_reply("iterations", "Failed to load planning intervals", e),
                            RelayBound::PiMeta {
                                meta: Vec::new(),
                                current: None,
                                next: None,
                            },
                        ]
                    }
                }
            }

            HostBound::ReqData { area_root, pi_root } => {
                match self
                    .client
                    .fetch_planning_data(&self.ctx, &area_root, &pi_root)
                    .await
                {
                    Ok(payload) => vec![RelayBound::Data { payload }],
                    Err(e) => {
                        tracing::warn!(error = %e, %area_root, %pi_root, "planning data fetch failed");
                        vec![
                            error_reply("data", "Failed to load planning data", e),
                            RelayBound::Data {
                                payload: PlanningData::default(),
                            },
                        ]
                    }
                }
            }

            HostBound::SetIteration { payload } => {
                match self
                    .client
                    .set_iteration(&self.ctx, payload.id, &payload.iteration_path)
                    .await
                {
                    Ok(()) => vec![RelayBound::Updated { id: payload.id }],
                    Err(e) => {
                        tracing::warn!(error = %e, id = payload.id, "iteration update failed");
                        vec![error_reply("set-iteration", "Failed to move work item", e)]
                    }
                }
            }

            HostBound::SetTests { payload } => {
                let update = self.settings.complete(payload);
                match self.client.set_test_tags(&self.ctx, &update).await {
                    Ok(_) => vec![RelayBound::Updated { id: update.id }],
                    Err(e) => {
                        tracing::warn!(error = %e, id = update.id, "test tag update failed");
                        vec![error_reply("set-tests", "Failed to update test tags", e)]
                    }
                }
            }

            HostBound::OpenWorkItem { id } => {
                let url = self.client.endpoints().work_item_edit_page(&self.ctx, id);
                self.page.open_url(&url);
                Vec::new()
            }

            // Handshake traffic is answered by the session listener.
            HostBound::Ping | HostBound::Pong => Vec::new(),
        }
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("ctx", &self.ctx)
            .field("client", &self.client)
            .field("settings", &self.settings)
            .finish()
    }
}

/// The host page's overlay lifecycle: opens a session when the trigger is
/// clicked and closes it on a backdrop click or page teardown.
pub struct HostRuntime {
    page: Arc<dyn HostPage>,
    handler: Arc<RequestHandler>,
    handshake: HandshakeConfig,
    trigger_id: String,
    events: broadcast::Receiver<PageEvent>,
    session: Option<Session>,
}

impl HostRuntime {
    /// Subscribes to page events immediately; clicks from here on are seen.
    pub fn new(
        page: Arc<dyn HostPage>,
        handler: Arc<RequestHandler>,
        handshake: HandshakeConfig,
    ) -> Self {
        let events = page.subscribe();
        Self {
            page,
            handler,
            handshake,
            trigger_id: TRIGGER_ID.to_string(),
            events,
            session: None,
        }
    }

    pub fn with_trigger_id(mut self, trigger_id: impl Into<String>) -> Self {
        self.trigger_id = trigger_id.into();
        self
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(Session::state)
            .unwrap_or(SessionState::Closed)
    }

    /// Open a session. No-op while a surface is attached.
    pub fn open(&mut self) -> Option<UiHandle> {
        let (session, ui) = Session::open(
            Arc::clone(&self.page),
            Arc::clone(&self.handler),
            self.handshake,
        )?;
        self.session = Some(session);
        Some(ui)
    }

    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    /// Drive the lifecycle until the page unloads. Each opened session's UI
    /// handle is sent to `ui`.
    pub async fn run(mut self, ui: mpsc::UnboundedSender<UiHandle>) {
        loop {
            match self.events.recv().await {
                Ok(PageEvent::Clicked { id }) if id == self.trigger_id => {
                    if let Some(handle) = self.open() {
                        if ui.send(handle).is_err() {
                            tracing::debug!("no UI runtime attached");
                        }
                    }
                }
                // Only the backdrop closes; clicks on the surface do not.
                Ok(PageEvent::Clicked { id }) if id == OVERLAY_ROOT_ID => self.close(),
                Ok(PageEvent::Clicked { .. })
                | Ok(PageEvent::Mutated)
                | Ok(PageEvent::Navigated { .. }) => {}
                Ok(PageEvent::Unloaded) | Err(broadcast::error::RecvError::Closed) => {
                    self.close();
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "page events lagged");
                }
            }
        }
        tracing::debug!("host runtime stopped");
    }
}
