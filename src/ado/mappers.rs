//! Projection of raw work items into feature and story DTOs.
//!
//! Field values are coerced permissively: a missing field becomes an empty
//! string (or `None` for the stack rank) instead of failing the mapping.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::fields;
use super::wiql::HIERARCHY_REVERSE;

/// A work item as returned by the batch endpoint.
///
/// Only a usable id is required; null or mistyped members fall back to
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItemRef {
    #[serde(deserialize_with = "lenient_id")]
    pub id: u64,
    #[serde(default, deserialize_with = "lenient_fields")]
    pub fields: Map<String, Value>,
    #[serde(
        default,
        deserialize_with = "lenient_relations",
        skip_serializing_if = "Option::is_none"
    )]
    pub relations: Option<Vec<WorkItemRelation>>,
}

/// A link on a work item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItemRelation {
    #[serde(default, deserialize_with = "lenient_string")]
    pub rel: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
}

/// Ids arrive as numbers, occasionally as numeric strings.
fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(d)?;
    match &value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom(format!("invalid work item id: {}", value)))
}

fn lenient_fields<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

fn lenient_relations<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Vec<WorkItemRelation>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(rows) => Some(
            rows.into_iter()
                .filter_map(|row| serde_json::from_value(row).ok())
                .collect(),
        ),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(value_string(Some(&Value::deserialize(d)?)))
}

/// String form of a JSON value; missing and null become empty.
fn value_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A feature row of the planning board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDto {
    pub id: u64,
    pub title: String,
    pub state: String,
    pub area_path: String,
    pub iteration_path: String,
    pub tags: Vec<String>,
    pub stack_rank: Option<f64>,
}

/// A story row of the planning board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDto {
    pub id: u64,
    /// Parent feature id, 0 when unknown.
    pub parent_id: u64,
    pub title: String,
    pub state: String,
    pub area_path: String,
    pub iteration_path: String,
}

fn field_string(f: &Map<String, Value>, name: &str) -> String {
    value_string(f.get(name))
}

/// Numeric form of the stack rank, `None` when absent or not a number.
fn field_rank(f: &Map<String, Value>) -> Option<f64> {
    match f.get(fields::STACK_RANK)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|r| r.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Split a `;`-joined tag string, trimming and dropping empties.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parent id from a `Hierarchy-Reverse` relation URL ending in `/{id}`.
pub fn parent_id_from_relations(relations: Option<&[WorkItemRelation]>) -> Option<u64> {
    relations?
        .iter()
        .find(|r| r.rel == HIERARCHY_REVERSE)
        .and_then(|r| r.url.rsplit('/').next())
        .and_then(|id| id.parse().ok())
}

pub fn to_feature_dto(item: &WorkItemRef) -> FeatureDto {
    let f = &item.fields;
    FeatureDto {
        id: item.id,
        title: field_string(f, fields::TITLE),
        state: field_string(f, fields::STATE),
        area_path: field_string(f, fields::AREA_PATH),
        iteration_path: field_string(f, fields::ITERATION_PATH),
        tags: split_tags(&field_string(f, fields::TAGS)),
        stack_rank: field_rank(f),
    }
}

/// Map a story, resolving its parent from the link map, then its relations.
pub fn to_story_dto(item: &WorkItemRef, parent_of: &HashMap<u64, u64>) -> StoryDto {
    let f = &item.fields;
    let parent_id = parent_of
        .get(&item.id)
        .copied()
        .or_else(|| parent_id_from_relations(item.relations.as_deref()))
        .unwrap_or(0);
    StoryDto {
        id: item.id,
        parent_id,
        title: field_string(f, fields::TITLE),
        state: field_string(f, fields::STATE),
        area_path: field_string(f, fields::AREA_PATH),
        iteration_path: field_string(f, fields::ITERATION_PATH),
    }
}

/// Sort by stack rank ascending, unranked last, stable among equals.
pub fn sort_features(features: &mut [FeatureDto]) {
    features.sort_by(|a, b| match (a.stack_rank, b.stack_rank) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value) -> WorkItemRef {
        serde_json::from_value(value).unwrap()
    }

    fn ranked(id: u64, rank: Option<f64>) -> FeatureDto {
        FeatureDto {
            id,
            title: String::new(),
            state: String::new(),
            area_path: String::new(),
            iteration_path: String::new(),
            tags: vec![],
            stack_rank: rank,
        }
    }

    #[test]
    fn test_feature_dto_maps_fields() {
        let wi = item(json!({
            "id": 7,
            "fields": {
                "System.Title": "Checkout",
                "System.State": "Active",
                "System.AreaPath": "Contoso\\ART",
                "System.IterationPath": "Contoso\\PI 1",
                "System.Tags": "SIT;  UAT ; ;",
                "Microsoft.VSTS.Common.StackRank": 12.5
            }
        }));
        let dto = to_feature_dto(&wi);
        assert_eq!(dto.id, 7);
        assert_eq!(dto.title, "Checkout");
        assert_eq!(dto.tags, vec!["SIT", "UAT"]);
        assert_eq!(dto.stack_rank, Some(12.5));
    }

    #[test]
    fn test_feature_dto_defaults_missing_fields() {
        let dto = to_feature_dto(&item(json!({"id": 3})));
        assert_eq!(dto.title, "");
        assert_eq!(dto.state, "");
        assert!(dto.tags.is_empty());
        assert_eq!(dto.stack_rank, None);
    }

    #[test]
    fn test_stack_rank_coercion() {
        let from_string = to_feature_dto(&item(
            json!({"id": 1, "fields": {"Microsoft.VSTS.Common.StackRank": " 4 "}}),
        ));
        assert_eq!(from_string.stack_rank, Some(4.0));

        let garbage = to_feature_dto(&item(
            json!({"id": 1, "fields": {"Microsoft.VSTS.Common.StackRank": "high"}}),
        ));
        assert_eq!(garbage.stack_rank, None);

        let null = to_feature_dto(&item(
            json!({"id": 1, "fields": {"Microsoft.VSTS.Common.StackRank": null}}),
        ));
        assert_eq!(null.stack_rank, None);
    }

    #[test]
    fn test_story_dto_parent_from_map() {
        let parents = HashMap::from([(5, 1)]);
        let dto = to_story_dto(&item(json!({"id": 5, "fields": {"System.Title": "Pay"}})), &parents);
        assert_eq!(dto.parent_id, 1);
        assert_eq!(dto.title, "Pay");
    }

    #[test]
    fn test_story_dto_parent_from_relations_then_zero() {
        let with_relation = item(json!({
            "id": 9,
            "relations": [
                {"rel": "System.LinkTypes.Related", "url": "https://x/_apis/wit/workItems/2"},
                {"rel": "System.LinkTypes.Hierarchy-Reverse", "url": "https://x/_apis/wit/workItems/44"}
            ]
        }));
        assert_eq!(to_story_dto(&with_relation, &HashMap::new()).parent_id, 44);
        assert_eq!(to_story_dto(&item(json!({"id": 9})), &HashMap::new()).parent_id, 0);
    }

    #[test]
    fn test_sort_features_nulls_last_stable() {
        let mut features = vec![
            ranked(1, None),
            ranked(2, Some(3.0)),
            ranked(3, Some(1.0)),
            ranked(4, None),
        ];
        sort_features(&mut features);
        let ranks: Vec<Option<f64>> = features.iter().map(|f| f.stack_rank).collect();
        assert_eq!(ranks, vec![Some(1.0), Some(3.0), None, None]);
        let ids: Vec<u64> = features.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_null_members_fall_back_to_defaults() {
        let no_fields = item(json!({"id": 2, "fields": null, "relations": null}));
        assert_eq!(no_fields.id, 2);
        assert!(no_fields.fields.is_empty());
        assert_eq!(no_fields.relations, None);
        assert_eq!(to_feature_dto(&no_fields).title, "");

        let null_rel = item(json!({
            "id": "3",
            "fields": {},
            "relations": [{"rel": null, "url": "x/1"}, null]
        }));
        assert_eq!(null_rel.id, 3);
        assert_eq!(
            null_rel.relations,
            Some(vec![WorkItemRelation {
                rel: String::new(),
                url: "x/1".to_string()
            }])
        );
        assert_eq!(to_story_dto(&null_rel, &HashMap::new()).parent_id, 0);
    }

    #[test]
    fn test_item_without_usable_id_is_rejected() {
        assert!(serde_json::from_value::<WorkItemRef>(json!({"fields": {}})).is_err());
        assert!(serde_json::from_value::<WorkItemRef>(json!({"id": "abc"})).is_err());
    }

    #[test]
    fn test_non_string_fields_are_stringified() {
        let dto = to_feature_dto(&item(json!({"id": 1, "fields": {"System.Title": 42}})));
        assert_eq!(dto.title, "42");
    }
}
