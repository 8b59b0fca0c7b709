//! Host page abstraction.
//!
//! The host application owns its document and rebuilds parts of it at will.
//! Everything the overlay needs from it goes through [`HostPage`]: anchor
//! lookup, element insertion and removal, structural change notifications,
//! and navigation. [`PageModel`] is the in-memory implementation used by the
//! `sp` binary and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use reqwest::Url;
use tokio::sync::broadcast;

/// Anchor that always exists.
pub const BODY: &str = "body";

/// Capacity of the page event channel.
const EVENT_CAPACITY: usize = 64;

/// Structural and user events emitted by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// Elements or anchors were added or removed.
    Mutated,
    /// The element with this id was clicked.
    Clicked { id: String },
    /// A new browsing context was opened at this URL.
    Navigated { url: Url },
    /// The page is being torn down.
    Unloaded,
}

/// An element the overlay places on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub label: Option<String>,
}

impl Element {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// The document the overlay is injected into.
pub trait HostPage: Send + Sync {
    /// Whether an element with `id` exists anywhere on the page.
    fn contains(&self, id: &str) -> bool;

    /// Whether the `anchor` container is currently rendered.
    fn has_anchor(&self, anchor: &str) -> bool;

    /// Append `element` under `anchor`. Returns false when the anchor is
    /// missing or the id is already taken.
    fn append_child(&self, anchor: &str, element: Element) -> bool;

    /// Remove the element with `id`. Returns whether it existed.
    fn remove(&self, id: &str) -> bool;

    /// Subscribe to page events.
    fn subscribe(&self) -> broadcast::Receiver<PageEvent>;

    /// Path component of the page location, e.g. `/org/project/_boards`.
    fn location_path(&self) -> String;

    /// Navigate to `url` in a new browsing context.
    fn open_url(&self, url: &Url);
}

#[derive(Debug, Default)]
struct PageState {
    anchors: HashMap<String, Vec<Element>>,
    opened: Vec<Url>,
}

/// In-memory page with anchors, elements, and an event stream.
#[derive(Debug)]
pub struct PageModel {
    path: String,
    state: Mutex<PageState>,
    events: broadcast::Sender<PageEvent>,
}

impl PageModel {
    /// A page at `path` with only the body anchor rendered.
    pub fn new(path: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut state = PageState::default();
        state.anchors.insert(BODY.to_string(), Vec::new());
        Self {
            path: path.into(),
            state: Mutex::new(state),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: PageEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Render an anchor container, as the host does after a rerender.
    pub fn add_anchor(&self, anchor: &str) {
        self.state().anchors.entry(anchor.to_string()).or_default();
        self.emit(PageEvent::Mutated);
    }

    /// Drop an anchor container and everything under it.
    pub fn remove_anchor(&self, anchor: &str) {
        if anchor == BODY {
            return;
        }
        if self.state().anchors.remove(anchor).is_some() {
            self.emit(PageEvent::Mutated);
        }
    }

    /// Click the element with `id`. Clicks on missing elements are ignored.
    pub fn click(&self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.emit(PageEvent::Clicked { id: id.to_string() });
        true
    }

    /// Tear the page down.
    pub fn unload(&self) {
        self.emit(PageEvent::Unloaded);
    }

    /// Number of elements with `id`.
    pub fn count(&self, id: &str) -> usize {
        self.state()
            .anchors
            .values()
            .flatten()
            .filter(|e| e.id == id)
            .count()
    }

    /// The element with `id`, if present.
    pub fn element(&self, id: &str) -> Option<Element> {
        self.state()
            .anchors
            .values()
            .flatten()
            .find(|e| e.id == id)
            .cloned()
    }

    /// URLs passed to [`HostPage::open_url`], oldest first.
    pub fn opened_urls(&self) -> Vec<Url> {
        self.state().opened.clone()
    }
}

impl HostPage for PageModel {
    fn contains(&self, id: &str) -> bool {
        self.count(id) > 0
    }

    fn has_anchor(&self, anchor: &str) -> bool {
        self.state().anchors.contains_key(anchor)
    }

    fn append_child(&self, anchor: &str, element: Element) -> bool {
        {
            let mut state = self.state();
            let taken = state.anchors.values().flatten().any(|e| e.id == element.id);
            match state.anchors.get_mut(anchor) {
                Some(children) if !taken => children.push(element),
                _ => return false,
            }
        }
        self.emit(PageEvent::Mutated);
        true
    }

    fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.state();
            let mut removed = false;
            for children in state.anchors.values_mut() {
                let before = children.len();
                children.retain(|e| e.id != id);
                removed |= children.len() != before;
            }
            removed
        };
        if removed {
            self.emit(PageEvent::Mutated);
        }
        removed
    }

    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    fn location_path(&self) -> String {
        self.path.clone()
    }

    fn open_url(&self, url: &Url) {
        tracing::info!(url = %url, "opening page");
        self.state().opened.push(url.clone());
        self.emit(PageEvent::Navigated { url: url.clone() });
    }
}
