//! Planning data pipeline: features in an area and cycle, plus their stories.
//!
//! 1. Feature ids from a flat WIQL query.
//! 2. Link rows from a recursive link query seeded with those ids.
//! 3. Parent map and story ids; targets that are themselves features are
//!    intermediate hierarchy hops and are dropped.
//! 4. Concurrent chunked batch reads for both id sets.
//! 5. DTO projection; features sorted by stack rank.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::http::TransportError;
use super::mappers::{FeatureDto, StoryDto, sort_features, to_feature_dto, to_story_dto};
use super::wiql::{WiqlLink, build_child_story_query, build_feature_query};
use super::workitems::{FEATURE_FIELDS, STORY_FIELDS};
use super::{AdoClient, AdoContext};

/// Features and stories for one area and planning interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningData {
    pub features: Vec<FeatureDto>,
    pub stories: Vec<StoryDto>,
}

/// Feature to story structure resolved from link rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoryLinks {
    /// Story id to parent feature id.
    pub parent_of: HashMap<u64, u64>,
    /// Distinct story ids in first-seen order.
    pub story_ids: Vec<u64>,
}

/// Build the parent map and story id set from link rows.
///
/// Rows without numeric endpoints (query roots) are skipped.
pub fn resolve_story_links(links: &[WiqlLink], feature_ids: &[u64]) -> StoryLinks {
    let features: HashSet<u64> = feature_ids.iter().copied().collect();
    let mut parent_of = HashMap::new();
    let mut seen = HashSet::new();
    let mut story_ids = Vec::new();

    for link in links {
        let (Some(source), Some(target)) = (link.source, link.target) else {
            continue;
        };
        parent_of.insert(target, source);
        if !features.contains(&target) && seen.insert(target) {
            story_ids.push(target);
        }
    }

    StoryLinks {
        parent_of,
        story_ids,
    }
}

impl AdoClient {
    /// Fetch the planning board for `area_root` and `cycle_root`.
    ///
    /// Failed batch chunks degrade to missing items; only the two queries can
    /// fail the whole call.
    pub async fn fetch_planning_data(
        &self,
        ctx: &AdoContext,
        area_root: &str,
        cycle_root: &str,
    ) -> Result<PlanningData, TransportError> {
        let feature_ids = self
            .run_wiql(ctx, &build_feature_query(area_root, cycle_root))
            .await?;

        let links = self
            .run_wiql_links(ctx, &build_child_story_query(&feature_ids))
            .await?;
        let StoryLinks {
            parent_of,
            story_ids,
        } = resolve_story_links(&links, &feature_ids);

        let (raw_features, raw_stories) = futures::join!(
            self.fetch_work_items_chunked(ctx, &feature_ids, &FEATURE_FIELDS),
            self.fetch_work_items_chunked(ctx, &story_ids, &STORY_FIELDS),
        );

        let mut features: Vec<FeatureDto> = raw_features.iter().map(to_feature_dto).collect();
        sort_features(&mut features);
        let stories: Vec<StoryDto> = raw_stories
            .iter()
            .map(|item| to_story_dto(item, &parent_of))
            .collect();

        tracing::info!(
            area_root,
            cycle_root,
            features = features.len(),
            stories = stories.len(),
            "planning data fetched"
        );
        Ok(PlanningData { features, stories })
    }
}
