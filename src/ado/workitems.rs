//! Batch reads and field mutations on work items.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::http::TransportError;
use super::mappers::{WorkItemRef, split_tags};
use super::{AdoClient, AdoContext, fields};

/// Maximum ids per call accepted by the batch endpoint.
pub const BATCH_LIMIT: usize = 200;

/// Projection requested for features.
pub const FEATURE_FIELDS: [&str; 7] = [
    fields::ID,
    fields::TITLE,
    fields::STATE,
    fields::AREA_PATH,
    fields::ITERATION_PATH,
    fields::TAGS,
    fields::STACK_RANK,
];

/// Projection requested for stories.
pub const STORY_FIELDS: [&str; 5] = [
    fields::ID,
    fields::TITLE,
    fields::STATE,
    fields::AREA_PATH,
    fields::ITERATION_PATH,
];

/// Partition `items` into consecutive slices of at most `size` elements.
pub fn chunk<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

/// JSON-patch operation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchVerb {
    Add,
    Replace,
}

/// One operation of a JSON-patch document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchVerb,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    /// Set a work item field.
    pub fn field(op: PatchVerb, field: &str, value: impl Into<Value>) -> Self {
        Self {
            op,
            path: format!("/fields/{}", field),
            value: value.into(),
        }
    }
}

/// Test-coverage flags for a work item and the tag literal for each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTagUpdate {
    pub id: u64,
    #[serde(default)]
    pub sit: bool,
    #[serde(default)]
    pub uat: bool,
    #[serde(default)]
    pub e2e: bool,
    #[serde(default)]
    pub sit_tag: String,
    #[serde(default)]
    pub uat_tag: String,
    #[serde(default)]
    pub e2e_tag: String,
}

impl TestTagUpdate {
    /// Flag and literal pairs in application order.
    fn flagged(&self) -> [(bool, &str); 3] {
        [
            (self.sit, self.sit_tag.trim()),
            (self.uat, self.uat_tag.trim()),
            (self.e2e, self.e2e_tag.trim()),
        ]
    }
}

/// Apply test-coverage flags to a `;`-joined tag string.
///
/// Recognized literals are removed, then re-added in sit, uat, e2e order when
/// flagged. Other tags keep their relative order.
pub fn apply_test_tags(existing: &str, update: &TestTagUpdate) -> String {
    let flagged = update.flagged();
    let recognized: Vec<&str> = flagged
        .iter()
        .map(|(_, literal)| *literal)
        .filter(|literal| !literal.is_empty())
        .collect();

    let mut tags: Vec<String> = split_tags(existing)
        .into_iter()
        .filter(|tag| !recognized.contains(&tag.as_str()))
        .collect();

    for (flag, literal) in flagged {
        if flag && !literal.is_empty() && !tags.iter().any(|t| t == literal) {
            tags.push(literal.to_string());
        }
    }

    tags.join("; ")
}

impl AdoClient {
    async fn try_fetch_work_items_batch(
        &self,
        ctx: &AdoContext,
        ids: &[u64],
        fields: &[&str],
    ) -> Result<Vec<WorkItemRef>, TransportError> {
        let url = self.endpoints().work_items_batch(ctx);
        let response = self
            .transport()
            .post_json(url, &json!({ "ids": ids, "fields": fields }))
            .await?;

        Ok(response
            .get("value")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match serde_json::from_value(item.clone()) {
                        Ok(item) => Some(item),
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping work item without id");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Read one chunk of work items. A failed call yields an empty chunk.
    pub async fn fetch_work_items_batch(
        &self,
        ctx: &AdoContext,
        ids: &[u64],
        fields: &[&str],
    ) -> Vec<WorkItemRef> {
        if ids.is_empty() {
            return Vec::new();
        }
        match self.try_fetch_work_items_batch(ctx, ids, fields).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, count = ids.len(), "batch fetch failed");
                Vec::new()
            }
        }
    }

    /// Read any number of work items, one concurrent batch call per chunk.
    pub async fn fetch_work_items_chunked(
        &self,
        ctx: &AdoContext,
        ids: &[u64],
        fields: &[&str],
    ) -> Vec<WorkItemRef> {
        let batches = chunk(ids, BATCH_LIMIT)
            .into_iter()
            .map(|ids| self.fetch_work_items_batch(ctx, ids, fields));
        join_all(batches).await.into_iter().flatten().collect()
    }

    async fn patch_work_item(
        &self,
        ctx: &AdoContext,
        id: u64,
        operations: &[PatchOperation],
    ) -> Result<(), TransportError> {
        let url = self.endpoints().work_item(ctx, id);
        let body = serde_json::to_value(operations)
            .map_err(|e| TransportError::Request(e.to_string()))?;
        self.transport().patch_json(url, &body).await?;
        Ok(())
    }

    /// Move a work item to another iteration.
    pub async fn set_iteration(
        &self,
        ctx: &AdoContext,
        id: u64,
        iteration_path: &str,
    ) -> Result<(), TransportError> {
        // "add" also overwrites an existing value.
        let op = PatchOperation::field(PatchVerb::Add, fields::ITERATION_PATH, iteration_path);
        self.patch_work_item(ctx, id, &[op]).await?;
        tracing::info!(id, iteration_path, "iteration updated");
        Ok(())
    }

    /// Read-modify-write of the test-coverage tags. Returns the new tag string.
    pub async fn set_test_tags(
        &self,
        ctx: &AdoContext,
        update: &TestTagUpdate,
    ) -> Result<String, TransportError> {
        let url = self
            .endpoints()
            .work_item_fields(ctx, update.id, &[fields::TAGS]);
        let current = self.transport().get_json(url).await?;
        let existing = current
            .get("fields")
            .and_then(|f| f.get(fields::TAGS))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let next = apply_test_tags(existing, update);
        // The field must be added when the item has never had tags.
        let verb = if existing.is_empty() {
            PatchVerb::Add
        } else {
            PatchVerb::Replace
        };
        let op = PatchOperation::field(verb, fields::TAGS, next.as_str());
        self.patch_work_item(ctx, update.id, &[op]).await?;

        tracing::info!(id = update.id, tags = %next, "test tags updated");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Method;

    use super::*;
    use crate::ado::Endpoints;
    use crate::test_utils::{MockTransport, server_error};

    fn update(sit: bool, uat: bool, e2e: bool) -> TestTagUpdate {
        TestTagUpdate {
            id: 42,
            sit,
            uat,
            e2e,
            sit_tag: "SIT".to_string(),
            uat_tag: "UAT".to_string(),
            e2e_tag: "E2E".to_string(),
        }
    }

    fn client(mock: MockTransport) -> (AdoClient, Arc<MockTransport>) {
        let mock = Arc::new(mock);
        let client = AdoClient::new(mock.clone(), Endpoints::new("http://ado.test").unwrap());
        (client, mock)
    }

    fn ctx() -> AdoContext {
        AdoContext::new("contoso", "Contoso")
    }

    #[test]
    fn test_chunk_sizes() {
        let ids: Vec<u64> = (0..450).collect();
        let chunks = chunk(&ids, BATCH_LIMIT);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![200, 200, 50]);
        assert!(chunk::<u64>(&[], BATCH_LIMIT).is_empty());
    }

    #[test]
    fn test_chunk_zero_size_does_not_panic() {
        assert_eq!(chunk(&[1, 2], 0).len(), 2);
    }

    #[test]
    fn test_apply_tags_preserves_unrelated_order() {
        let result = apply_test_tags("foo; SIT; bar", &update(false, true, false));
        assert_eq!(result, "foo; bar; UAT");
    }

    #[test]
    fn test_apply_tags_is_idempotent() {
        let u = update(true, false, true);
        let once = apply_test_tags("alpha; E2E; beta", &u);
        let twice = apply_test_tags(&once, &u);
        assert_eq!(once, "alpha; beta; SIT; E2E");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_apply_tags_ignores_empty_literals() {
        let mut u = update(true, true, true);
        u.uat_tag = String::new();
        assert_eq!(apply_test_tags("", &u), "SIT; E2E");
    }

    #[test]
    fn test_apply_tags_clears_all_flags() {
        assert_eq!(apply_test_tags("SIT;UAT;E2E", &update(false, false, false)), "");
    }

    #[test]
    fn test_patch_operation_serializes_lowercase_verb() {
        let op = PatchOperation::field(PatchVerb::Replace, fields::TAGS, "a; b");
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "replace", "path": "/fields/System.Tags", "value": "a; b"})
        );
    }

    #[test]
    fn test_test_tag_update_wire_names() {
        let u: TestTagUpdate = serde_json::from_value(json!({
            "id": 1, "sit": true, "uat": false, "e2e": true,
            "sitTag": "SIT", "uatTag": "UAT", "e2eTag": "E2E"
        }))
        .unwrap();
        assert_eq!(u.e2e_tag, "E2E");
        assert!(u.sit && u.e2e && !u.uat);
    }

    #[tokio::test]
    async fn test_chunked_fetch_drops_only_failed_chunk() {
        let mock = MockTransport::new().on(Method::POST, "/workitemsbatch", |call| {
            let ids = call.ids();
            if ids.contains(&200) {
                return Err(server_error());
            }
            let value: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
            Ok(json!({ "value": value }))
        });
        let (client, mock) = client(mock);

        let ids: Vec<u64> = (0..450).collect();
        let items = client
            .fetch_work_items_chunked(&ctx(), &ids, &STORY_FIELDS)
            .await;

        let mut fetched: Vec<u64> = items.iter().map(|i| i.id).collect();
        fetched.sort_unstable();
        let expected: Vec<u64> = (0..200).chain(400..450).collect();
        assert_eq!(fetched, expected);
        assert_eq!(mock.calls_to(Method::POST, "/workitemsbatch").len(), 3);
    }

    #[tokio::test]
    async fn test_batch_keeps_items_with_null_members() {
        let mock = MockTransport::new().on(Method::POST, "/workitemsbatch", |_| {
            Ok(json!({"value": [
                {"id": 1, "fields": {"System.Title": "A"}},
                {"id": 2, "fields": null},
                {"id": 3, "fields": {}, "relations": [{"rel": null, "url": "x/1"}]}
            ]}))
        });
        let (client, _) = client(mock);
        let items = client
            .fetch_work_items_batch(&ctx(), &[1, 2, 3], &STORY_FIELDS)
            .await;
        let ids: Vec<u64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(items[1].fields.is_empty());
    }

    #[tokio::test]
    async fn test_batch_without_value_is_empty() {
        let mock = MockTransport::new().on(Method::POST, "/workitemsbatch", |_| Ok(json!({})));
        let (client, _) = client(mock);
        assert!(client
            .fetch_work_items_batch(&ctx(), &[1], &STORY_FIELDS)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_set_iteration_sends_add_patch() {
        let mock = MockTransport::new().on(Method::PATCH, "/workitems/42", |_| Ok(json!({"id": 42})));
        let (client, mock) = client(mock);

        client
            .set_iteration(&ctx(), 42, "Contoso\\PI 2\\Sprint 1")
            .await
            .unwrap();

        let calls = mock.calls_to(Method::PATCH, "/workitems/42");
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].body,
            Some(json!([{
                "op": "add",
                "path": "/fields/System.IterationPath",
                "value": "Contoso\\PI 2\\Sprint 1"
            }]))
        );
    }

    #[tokio::test]
    async fn test_set_iteration_surfaces_transport_error() {
        let mock = MockTransport::new().on(Method::PATCH, "/workitems/42", |_| Err(server_error()));
        let (client, _) = client(mock);
        let err = client.set_iteration(&ctx(), 42, "x").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_set_test_tags_replaces_existing() {
        let mock = MockTransport::new()
            .on(Method::GET, "/workitems/42", |_| {
                Ok(json!({"id": 42, "fields": {"System.Tags": "foo; SIT; bar"}}))
            })
            .on(Method::PATCH, "/workitems/42", |_| Ok(json!({"id": 42})));
        let (client, mock) = client(mock);

        let tags = client
            .set_test_tags(&ctx(), &update(false, true, false))
            .await
            .unwrap();
        assert_eq!(tags, "foo; bar; UAT");

        let get = &mock.calls_to(Method::GET, "/workitems/42")[0];
        assert!(get.url.query().unwrap().contains("fields=System.Tags"));
        let patch = &mock.calls_to(Method::PATCH, "/workitems/42")[0];
        assert_eq!(patch.body.as_ref().unwrap()[0]["op"], "replace");
    }

    #[tokio::test]
    async fn test_set_test_tags_adds_when_untagged() {
        let mock = MockTransport::new()
            .on(Method::GET, "/workitems/42", |_| Ok(json!({"id": 42, "fields": {}})))
            .on(Method::PATCH, "/workitems/42", |_| Ok(json!({"id": 42})));
        let (client, mock) = client(mock);

        let tags = client
            .set_test_tags(&ctx(), &update(true, false, false))
            .await
            .unwrap();
        assert_eq!(tags, "SIT");

        let patch = &mock.calls_to(Method::PATCH, "/workitems/42")[0];
        assert_eq!(
            patch.body,
            Some(json!([{"op": "add", "path": "/fields/System.Tags", "value": "SIT"}]))
        );
    }
}
