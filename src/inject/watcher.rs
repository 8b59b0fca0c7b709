//! Trigger injection into an unstable host page.
//!
//! The host renders its header lazily and may rebuild it at any time, so a
//! single insertion attempt is not enough. After an immediate attempt the
//! watch re-attempts on every structural change and on a fixed poll as a
//! safety net. Both stop together on success, on poll exhaustion, or when
//! the watch is cancelled or dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::page::{Element, HostPage, PageEvent};

/// Id of the trigger control.
pub const TRIGGER_ID: &str = "sprintplanner-button";

/// Container the trigger is attached to.
pub const TRIGGER_ANCHOR: &str = ".region-header-menubar";

/// Visible label of the trigger control.
pub const TRIGGER_LABEL: &str = "Sprint Planner";

/// Default poll interval.
pub const DEFAULT_INJECT_INTERVAL: Duration = Duration::from_millis(500);

/// Default poll budget.
pub const DEFAULT_INJECT_MAX_RETRIES: u32 = 30;

/// Where and how often to try placing the trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionConfig {
    pub trigger_id: String,
    pub anchor: String,
    pub label: String,
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            trigger_id: TRIGGER_ID.to_string(),
            anchor: TRIGGER_ANCHOR.to_string(),
            label: TRIGGER_LABEL.to_string(),
            interval: DEFAULT_INJECT_INTERVAL,
            max_retries: DEFAULT_INJECT_MAX_RETRIES,
        }
    }
}

/// Place the trigger if its anchor is rendered.
///
/// Returns true when the trigger is present afterwards, including when it
/// already was.
pub fn try_inject_once(page: &dyn HostPage, cfg: &InjectionConfig) -> bool {
    if page.contains(&cfg.trigger_id) {
        return true;
    }
    if !page.has_anchor(&cfg.anchor) {
        return false;
    }
    let trigger = Element::new(cfg.trigger_id.as_str()).with_label(cfg.label.as_str());
    page.append_child(&cfg.anchor, trigger) || page.contains(&cfg.trigger_id)
}

/// How a background watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Injected after a page change.
    Observed,
    /// Injected by the poll.
    Polled,
    /// Poll budget spent without finding the anchor.
    Exhausted,
    /// Cancelled or the page unloaded.
    Cancelled,
}

impl InjectOutcome {
    pub fn is_injected(&self) -> bool {
        matches!(self, InjectOutcome::Observed | InjectOutcome::Polled)
    }
}

/// A running background injection attempt.
///
/// Dropping the watch cancels it.
#[derive(Debug)]
pub struct InjectionWatch {
    cancel: CancellationToken,
    handle: Option<JoinHandle<InjectOutcome>>,
}

impl InjectionWatch {
    /// Stop observing and polling.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the watch to finish.
    pub async fn wait(mut self) -> InjectOutcome {
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(InjectOutcome::Cancelled),
            None => InjectOutcome::Cancelled,
        }
    }
}

impl Drop for InjectionWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Result of [`ensure_trigger_present`].
#[derive(Debug)]
pub enum Injection {
    /// The trigger was placed synchronously.
    Present,
    /// The anchor was missing; a background watch is running.
    Watching(InjectionWatch),
}

/// Make sure the trigger exists exactly once on `page`.
///
/// Must be called from within a tokio runtime when the anchor is missing.
pub fn ensure_trigger_present(page: Arc<dyn HostPage>, cfg: InjectionConfig) -> Injection {
    // Subscribe first so a change between the attempt and the watch is seen.
    let events = page.subscribe();
    if try_inject_once(page.as_ref(), &cfg) {
        tracing::debug!(id = %cfg.trigger_id, "trigger injected immediately");
        return Injection::Present;
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(watch(page, cfg, events, cancel.clone()));
    Injection::Watching(InjectionWatch {
        cancel,
        handle: Some(handle),
    })
}

async fn watch(
    page: Arc<dyn HostPage>,
    cfg: InjectionConfig,
    mut events: tokio::sync::broadcast::Receiver<PageEvent>,
    cancel: CancellationToken,
) -> InjectOutcome {
    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the immediate attempt already ran.
    ticker.tick().await;

    let mut attempts = 0u32;
    let mut observing = true;

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break InjectOutcome::Cancelled,
            event = events.recv(), if observing => match event {
                Ok(PageEvent::Unloaded) => break InjectOutcome::Cancelled,
                Ok(PageEvent::Clicked { .. }) | Ok(PageEvent::Navigated { .. }) => {}
                Ok(PageEvent::Mutated) | Err(RecvError::Lagged(_)) => {
                    if try_inject_once(page.as_ref(), &cfg) {
                        break InjectOutcome::Observed;
                    }
                }
                Err(RecvError::Closed) => observing = false,
            },
            _ = ticker.tick() => {
                attempts += 1;
                if try_inject_once(page.as_ref(), &cfg) {
                    break InjectOutcome::Polled;
                }
                if attempts >= cfg.max_retries {
                    break InjectOutcome::Exhausted;
                }
            }
        }
    };

    cancel.cancel();
    match outcome {
        InjectOutcome::Exhausted => tracing::warn!(
            anchor = %cfg.anchor,
            attempts,
            "trigger anchor not found, giving up"
        ),
        other => tracing::debug!(?other, attempts, "injection watch finished"),
    }
    outcome
}
