//! Cross-context message protocol.
//!
//! Messages are JSON objects with a `type` discriminant. Two closed unions
//! cover the two directions:
//!
//! ## Relay → Host ([`HostBound`])
//! - `SP_REQ_ITERATIONS`, `SP_REQ_AREAS`, `SP_REQ_DATA`: planning data reads
//! - `SP_SET_ITERATION`, `SP_SET_TESTS`: work item mutations
//! - `SP_OPEN_WORKITEM`: navigate the host to a work item
//! - `SP_PING` / `SP_PONG`: liveness handshake
//!
//! ## Host → Relay ([`RelayBound`])
//! - `SP_AREAS`, `SP_AREA_FAVORITES`, `SP_PI_META`, `SP_DATA`: read replies
//! - `SP_UPDATED`: mutation acknowledgement
//! - `SP_ERROR`: a failed request
//! - `SP_PING` / `SP_PONG`: liveness handshake
//!
//! Anything else (non-objects, a missing or unknown `type`, a malformed
//! payload) is not a message and is dropped by [`decode`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ado::classification::{AreaRoot, PiRow};
use crate::ado::pipeline::PlanningData;
use crate::ado::workitems::TestTagUpdate;

// ============================================================================
// Relay → Host Messages
// ============================================================================

/// Messages the host context accepts.
///
/// # Examples
///
/// ```json
/// {"type": "SP_REQ_DATA", "areaRoot": "Contoso\\ART", "piRoot": "Contoso\\PI 3"}
/// {"type": "SP_SET_ITERATION", "payload": {"id": 42, "iterationPath": "Contoso\\PI 3\\Sprint 1"}}
/// {"type": "SP_PING"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostBound {
    /// Request the project's planning intervals.
    #[serde(rename = "SP_REQ_ITERATIONS")]
    ReqIterations,

    /// Request the project's top-level areas.
    #[serde(rename = "SP_REQ_AREAS")]
    ReqAreas,

    /// Request features and stories for an area and planning interval.
    #[serde(rename = "SP_REQ_DATA")]
    ReqData {
        #[serde(rename = "areaRoot")]
        area_root: String,
        #[serde(rename = "piRoot")]
        pi_root: String,
    },

    /// Move a work item to another iteration.
    #[serde(rename = "SP_SET_ITERATION")]
    SetIteration { payload: SetIterationPayload },

    /// Update the test-coverage tags of a work item.
    #[serde(rename = "SP_SET_TESTS")]
    SetTests { payload: TestTagUpdate },

    /// Open a work item in the host application.
    #[serde(rename = "SP_OPEN_WORKITEM")]
    OpenWorkItem { id: u64 },

    #[serde(rename = "SP_PING")]
    Ping,

    #[serde(rename = "SP_PONG")]
    Pong,
}

/// Target iteration of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetIterationPayload {
    pub id: u64,
    pub iteration_path: String,
}

// ============================================================================
// Host → Relay Messages
// ============================================================================

/// Messages the relay context accepts.
///
/// # Examples
///
/// ```json
/// {"type": "SP_AREAS", "areas": [{"id": "Contoso\\ART", "name": "ART"}]}
/// {"type": "SP_UPDATED", "id": 42}
/// {"type": "SP_ERROR", "error": {"source": "data", "message": "Failed to load planning data"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayBound {
    #[serde(rename = "SP_AREAS")]
    Areas { areas: Vec<AreaRoot> },

    /// Configured favorite area roots present in the last `SP_AREAS`.
    #[serde(rename = "SP_AREA_FAVORITES")]
    AreaFavorites { favorites: Vec<String> },

    /// Planning intervals, with the current and next one when known.
    #[serde(rename = "SP_PI_META")]
    PiMeta {
        meta: Vec<PiRow>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<String>,
    },

    #[serde(rename = "SP_DATA")]
    Data { payload: PlanningData },

    /// A mutation of work item `id` succeeded.
    #[serde(rename = "SP_UPDATED")]
    Updated { id: u64 },

    #[serde(rename = "SP_ERROR")]
    Error { error: ErrorPayload },

    #[serde(rename = "SP_PING")]
    Ping,

    #[serde(rename = "SP_PONG")]
    Pong,
}

/// Description of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Request kind that failed, e.g. `areas`, `data`, `set-tests`.
    pub source: String,
    /// Short human-readable summary.
    pub message: String,
    /// Underlying error, for logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorPayload {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// The `type` discriminant of a raw message, if it has one.
pub fn message_type(value: &Value) -> Option<&str> {
    value.as_object()?.get("type")?.as_str()
}

/// Decode a raw message, dropping anything that is not a known shape.
pub fn decode<T: DeserializeOwned>(value: &Value) -> Option<T> {
    let Some(kind) = message_type(value) else {
        tracing::debug!("dropping message without a type");
        return None;
    };
    match serde_json::from_value(value.clone()) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!(kind, error = %e, "dropping unrecognized message");
            None
        }
    }
}

/// Encode a message for posting.
pub fn encode<T: Serialize>(message: &T) -> Value {
    // Null is dropped by every receiver.
    serde_json::to_value(message).unwrap_or(Value::Null)
}
