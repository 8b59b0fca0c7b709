//! Cross-context bridge between the planning UI and the host page.
//!
//! Three contexts cooperate:
//! - **Host** ([`host`]): holds the API credentials and serves requests
//! - **Relay** ([`relay`]): the isolated surface containing the UI
//! - **UI runtime**: consumes [`UiHandle`] ports
//!
//! Contexts talk only through [`mailbox`] ports using the [`protocol`]
//! messages. A [`session`] ties one relay to one host listener.

pub mod host;
pub mod mailbox;
pub mod protocol;
pub mod relay;
pub mod session;

pub use host::{HostRuntime, HostSettings, RequestHandler};
pub use relay::{UiCommand, UiEvent, UiHandle};
pub use session::{HandshakeConfig, Session, SessionState};

/// Origin of the host page context.
pub const HOST_ORIGIN: &str = "https://dev.azure.com";

/// Origin of the relay surface.
pub const RELAY_ORIGIN: &str = "sprintplanner://overlay";

/// Id of the backdrop element wrapping the relay surface.
pub const OVERLAY_ROOT_ID: &str = "sp-overlay-root";

/// Id of the relay surface element.
pub const OVERLAY_SURFACE_ID: &str = "sp-overlay-iframe";
