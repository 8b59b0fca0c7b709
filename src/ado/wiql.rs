//! WIQL query construction and execution.
//!
//! Two query shapes are used by the planning pipeline:
//! - a flat `workitems` query returning `{ workItems: [{ id }] }`
//! - a recursive `workitemLinks` query returning
//!   `{ workItemRelations: [{ rel, source: { id }, target: { id } }] }`
//!
//! Link queries return one root row per seed (`rel` and `source` null) followed
//! by the link rows.

use serde_json::{Value, json};

use super::http::TransportError;
use super::{AdoClient, AdoContext};

/// Parent to child link type.
pub const HIERARCHY_FORWARD: &str = "System.LinkTypes.Hierarchy-Forward";

/// Child to parent link type.
pub const HIERARCHY_REVERSE: &str = "System.LinkTypes.Hierarchy-Reverse";

/// Work item types treated as stories under a feature.
pub const STORY_TYPES: [&str; 3] = ["User Story", "Product Backlog Item", "Story"];

/// Id that no work item can have.
const IMPOSSIBLE_ID: i64 = -1;

/// Features whose area is under `area_root` and iteration under `cycle_root`.
pub fn build_feature_query(area_root: &str, cycle_root: &str) -> String {
    format!(
        r#"SELECT [System.Id]
FROM workitems
WHERE
  [System.TeamProject] = @project
  AND [System.WorkItemType] = 'Feature'
  AND [System.AreaPath] UNDER "{area_root}"
  AND [System.IterationPath] UNDER "{cycle_root}"
ORDER BY [System.ChangedDate] DESC"#
    )
}

/// Story links under the given feature ids.
///
/// An empty id list yields a query seeded with an impossible id instead of
/// dropping the `IN` clause, which would select every link in the project.
pub fn build_child_story_query(feature_ids: &[u64]) -> String {
    if feature_ids.is_empty() {
        return format!(
            r#"SELECT [System.Id]
FROM workitemLinks
WHERE
  [Source].[System.Id] IN ({IMPOSSIBLE_ID})
MODE (Recursive)"#
        );
    }

    let id_list = feature_ids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let story_types = STORY_TYPES
        .iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        r#"SELECT [System.Id]
FROM workitemLinks
WHERE
  [Source].[System.Id] IN ({id_list})
  AND [System.Links.LinkType] = '{HIERARCHY_FORWARD}'
  AND [Target].[System.WorkItemType] IN ({story_types})
MODE (Recursive)"#
    )
}

/// One row of a link query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiqlLink {
    pub rel: Option<String>,
    pub source: Option<u64>,
    pub target: Option<u64>,
}

/// Read a work item id from a JSON number or numeric string.
pub(crate) fn numeric_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn endpoint_id(row: &Value, key: &str) -> Option<u64> {
    row.get(key).and_then(|e| e.get("id")).and_then(numeric_id)
}

/// Ids from a flat query result. Rows without a numeric id are skipped.
pub fn parse_work_item_ids(result: &Value) -> Vec<u64> {
    result
        .get("workItems")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("id").and_then(numeric_id))
                .collect()
        })
        .unwrap_or_default()
}

/// Link rows from a link query result.
pub fn parse_work_item_links(result: &Value) -> Vec<WiqlLink> {
    result
        .get("workItemRelations")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| WiqlLink {
                    rel: row.get("rel").and_then(Value::as_str).map(str::to_string),
                    source: endpoint_id(row, "source"),
                    target: endpoint_id(row, "target"),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl AdoClient {
    async fn post_wiql(&self, ctx: &AdoContext, query: &str) -> Result<Value, TransportError> {
        let url = self.endpoints().wiql(ctx);
        self.transport()
            .post_json(url, &json!({ "query": query }))
            .await
    }

    /// Execute a flat query and return the matching ids in result order.
    pub async fn run_wiql(&self, ctx: &AdoContext, query: &str) -> Result<Vec<u64>, TransportError> {
        let result = self.post_wiql(ctx, query).await?;
        let ids = parse_work_item_ids(&result);
        tracing::debug!(count = ids.len(), "wiql ids");
        Ok(ids)
    }

    /// Execute a link query and return every relation row.
    pub async fn run_wiql_links(
        &self,
        ctx: &AdoContext,
        query: &str,
    ) -> Result<Vec<WiqlLink>, TransportError> {
        let result = self.post_wiql(ctx, query).await?;
        let links = parse_work_item_links(&result);
        tracing::debug!(count = links.len(), "wiql links");
        Ok(links)
    }
}
