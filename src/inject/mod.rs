//! Host page model and trigger injection.

pub mod page;
pub mod watcher;

pub use page::{BODY, Element, HostPage, PageEvent, PageModel};
pub use watcher::{
    InjectOutcome, Injection, InjectionConfig, InjectionWatch, TRIGGER_ANCHOR, TRIGGER_ID,
    ensure_trigger_present, try_inject_once,
};
