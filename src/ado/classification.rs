//! Area and iteration classification trees.
//!
//! Areas are read one level deep: the root's children are the area roots a
//! user plans against. Iterations are read four levels deep and flattened
//! into planning interval rows (`PI n` nodes and their sprints).

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::http::{TransportError, decode};
use super::{AdoClient, AdoContext};

/// Name prefix of planning interval nodes.
pub const PI_PREFIX: &str = "PI ";

/// Innovation/planning sprint names, excluded from sprint lists.
static IP_SPRINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)IP\s*Sprint").expect("valid IP sprint regex"));

/// A node of an area or iteration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationNode {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub attributes: Option<NodeAttributes>,
    #[serde(default)]
    pub children: Option<Vec<ClassificationNode>>,
}

impl ClassificationNode {
    /// Immediate children; nodes beyond the fetched depth have none.
    pub fn children(&self) -> &[ClassificationNode] {
        self.children.as_deref().unwrap_or_default()
    }
}

/// Scheduling attributes of an iteration node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub finish_date: Option<String>,
    #[serde(default)]
    pub time_frame: Option<String>,
}

/// A top-level area a user can plan against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaRoot {
    /// `<project>\<area>`, usable in `UNDER` clauses.
    pub id: String,
    pub name: String,
}

/// A planning interval flattened from the iteration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiRow {
    /// `<project>\<PI name>`, usable in `UNDER` clauses.
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sprint_names: Vec<String>,
}

/// Parse an ISO 8601 date as reported on iteration attributes.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Area roots from an area tree read one level deep.
pub fn area_roots(project: &str, root: &ClassificationNode) -> Vec<AreaRoot> {
    root.children()
        .iter()
        .map(|child| AreaRoot {
            id: format!("{}\\{}", project, child.name),
            name: child.name.clone(),
        })
        .collect()
}

/// Flatten an iteration tree into planning interval rows sorted by start.
pub fn flatten_pi_roots(root: &ClassificationNode) -> Vec<PiRow> {
    let project = &root.name;

    let mut rows: Vec<PiRow> = root
        .children()
        .iter()
        .filter(|node| node.name.starts_with(PI_PREFIX))
        .map(|pi| {
            let attributes = pi.attributes.as_ref();
            let start = attributes
                .and_then(|a| a.start_date.as_deref())
                .and_then(parse_date);
            let finish = attributes
                .and_then(|a| a.finish_date.as_deref())
                .and_then(parse_date);
            let sprint_names = pi
                .children()
                .iter()
                .map(|c| c.name.clone())
                .filter(|name| !IP_SPRINT.is_match(name))
                .collect();

            PiRow {
                root: format!("{}\\{}", project, pi.name),
                start,
                finish,
                sprint_names,
            }
        })
        .collect();

    // Missing start sorts as the epoch.
    rows.sort_by_key(|row| row.start.map(|s| s.timestamp_millis()).unwrap_or(0));
    rows
}

/// Pick the current planning interval and the one after it.
///
/// Current is the row whose `[start, finish)` contains `now`; failing that the
/// first row starting after `now`; failing that the last row. Next is the row
/// after current, or `None` when current is last.
pub fn pick_current_and_next(
    pis: &[PiRow],
    now: DateTime<Utc>,
) -> (Option<String>, Option<String>) {
    if pis.is_empty() {
        return (None, None);
    }

    let containing = pis.iter().position(|p| match (p.start, p.finish) {
        (Some(start), Some(finish)) => start <= now && now < finish,
        _ => false,
    });
    let idx = containing
        .or_else(|| pis.iter().position(|p| p.start.is_some_and(|s| s > now)))
        .unwrap_or(pis.len() - 1);
    let next_idx = (idx + 1).min(pis.len() - 1);

    let current = pis[idx].root.clone();
    let next = if next_idx != idx && pis[next_idx].root != current {
        Some(pis[next_idx].root.clone())
    } else {
        None
    };
    (Some(current), next)
}

impl AdoClient {
    /// Top-level areas of the project.
    pub async fn fetch_area_roots(&self, ctx: &AdoContext) -> Result<Vec<AreaRoot>, TransportError> {
        let url = self.endpoints().area_nodes(ctx);
        let root: ClassificationNode = decode(self.transport().get_json(url).await?)?;
        Ok(area_roots(&ctx.project, &root))
    }

    /// The project's iteration tree.
    pub async fn fetch_project_iterations(
        &self,
        ctx: &AdoContext,
    ) -> Result<ClassificationNode, TransportError> {
        let url = self.endpoints().iteration_nodes(ctx);
        decode(self.transport().get_json(url).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn pi(root: &str, start: DateTime<Utc>, finish: DateTime<Utc>) -> PiRow {
        PiRow {
            root: root.to_string(),
            start: Some(start),
            finish: Some(finish),
            sprint_names: vec![],
        }
    }

    fn iteration_tree() -> ClassificationNode {
        serde_json::from_value(json!({
            "name": "Contoso",
            "children": [
                {
                    "name": "PI 2",
                    "attributes": {"startDate": "2026-04-01T00:00:00Z", "finishDate": "2026-07-01T00:00:00Z"},
                    "children": [
                        {"name": "PI 2 Sprint 1"},
                        {"name": "PI 2 IP Sprint"},
                        {"name": "ip sprint"}
                    ]
                },
                {"name": "Backlog"},
                {
                    "name": "PI 1",
                    "attributes": {"startDate": "2026-01-01T00:00:00Z", "finishDate": "2026-04-01T00:00:00Z"},
                    "children": [{"name": "PI 1 Sprint 1"}, {"name": "PI 1 Sprint 2"}]
                },
                {"name": "PI Draft"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_flatten_filters_pi_nodes_and_sorts_by_start() {
        let rows = flatten_pi_roots(&iteration_tree());
        let roots: Vec<&str> = rows.iter().map(|r| r.root.as_str()).collect();
        // Undated "PI Draft" sorts first.
        assert_eq!(roots, vec!["Contoso\\PI Draft", "Contoso\\PI 1", "Contoso\\PI 2"]);
    }

    #[test]
    fn test_flatten_drops_ip_sprints_case_insensitive() {
        let rows = flatten_pi_roots(&iteration_tree());
        let pi2 = rows.iter().find(|r| r.root.ends_with("PI 2")).unwrap();
        assert_eq!(pi2.sprint_names, vec!["PI 2 Sprint 1"]);
        assert_eq!(pi2.start, Some(date(2026, 4, 1)));
    }

    #[test]
    fn test_flatten_missing_children_is_empty() {
        let root = ClassificationNode {
            name: "Contoso".to_string(),
            ..Default::default()
        };
        assert!(flatten_pi_roots(&root).is_empty());
    }

    #[test]
    fn test_pick_current_and_next_inside_interval() {
        let pis = vec![
            pi("P1", date(2026, 1, 1), date(2026, 2, 1)),
            pi("P2", date(2026, 2, 1), date(2026, 3, 1)),
        ];
        let picked = pick_current_and_next(&pis, date(2026, 1, 15));
        assert_eq!(picked, (Some("P1".to_string()), Some("P2".to_string())));
    }

    #[test]
    fn test_pick_current_and_next_after_all() {
        let pis = vec![
            pi("P1", date(2026, 1, 1), date(2026, 2, 1)),
            pi("P2", date(2026, 2, 1), date(2026, 3, 1)),
        ];
        let picked = pick_current_and_next(&pis, date(2026, 6, 1));
        assert_eq!(picked, (Some("P2".to_string()), None));
    }

    #[test]
    fn test_pick_current_and_next_before_all_picks_first_future() {
        let pis = vec![
            pi("P1", date(2026, 1, 1), date(2026, 2, 1)),
            pi("P2", date(2026, 2, 1), date(2026, 3, 1)),
        ];
        let picked = pick_current_and_next(&pis, date(2025, 12, 1));
        assert_eq!(picked, (Some("P1".to_string()), Some("P2".to_string())));
    }

    #[test]
    fn test_pick_current_and_next_empty() {
        assert_eq!(pick_current_and_next(&[], date(2026, 1, 1)), (None, None));
    }

    #[test]
    fn test_area_roots_prefix_project() {
        let root: ClassificationNode = serde_json::from_value(json!({
            "name": "Contoso",
            "children": [{"name": "ART One"}, {"name": "ART Two"}]
        }))
        .unwrap();
        let areas = area_roots("Contoso", &root);
        assert_eq!(
            areas,
            vec![
                AreaRoot { id: "Contoso\\ART One".into(), name: "ART One".into() },
                AreaRoot { id: "Contoso\\ART Two".into(), name: "ART Two".into() },
            ]
        );
    }

    #[test]
    fn test_parse_date_accepts_naive_forms() {
        assert_eq!(parse_date("2026-01-05T00:00:00"), Some(date(2026, 1, 5)));
        assert_eq!(parse_date("2026-01-05"), Some(date(2026, 1, 5)));
        assert_eq!(parse_date("soon"), None);
    }
}
