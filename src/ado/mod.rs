//! Azure DevOps work item API: queries, batch reads, mutations.
//!
//! All calls go through an [`AdoClient`], which pairs a [`Transport`] with the
//! [`Endpoints`] URL builder. Operations are scoped to an [`AdoContext`]
//! (organization + project) resolved from the host page.

pub mod classification;
pub mod http;
pub mod mappers;
pub mod pipeline;
pub mod wiql;
pub mod workitems;

use std::sync::Arc;

use percent_encoding::percent_decode_str;
use reqwest::Url;

use crate::{Error, Result};
use http::Transport;

/// Default service root for Azure DevOps Services.
pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";

/// API version for classification node reads.
pub const CLASSIFICATION_API_VERSION: &str = "7.1-preview.2";

/// API version for WIQL execution.
pub const WIQL_API_VERSION: &str = "7.1-preview.2";

/// API version for the work items batch endpoint.
pub const BATCH_API_VERSION: &str = "7.1-preview.1";

/// API version for single work item reads and updates.
pub const WORK_ITEM_API_VERSION: &str = "7.1-preview.3";

/// Namespaced work item field identifiers.
pub mod fields {
    pub const ID: &str = "System.Id";
    pub const TITLE: &str = "System.Title";
    pub const STATE: &str = "System.State";
    pub const AREA_PATH: &str = "System.AreaPath";
    pub const ITERATION_PATH: &str = "System.IterationPath";
    pub const TAGS: &str = "System.Tags";
    pub const WORK_ITEM_TYPE: &str = "System.WorkItemType";
    pub const STACK_RANK: &str = "Microsoft.VSTS.Common.StackRank";
}

/// Organization and project an operation is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdoContext {
    pub org: String,
    pub project: String,
}

impl AdoContext {
    pub fn new(org: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            project: project.into(),
        }
    }

    /// Resolve org and project from a board page path.
    ///
    /// `/{org}/{project}/_boards/...` yields `{org, project}` with the project
    /// percent-decoded. Returns `None` when either segment is missing.
    pub fn from_page_path(path: &str) -> Option<Self> {
        let mut segments = path.strip_prefix('/')?.split('/');
        let org = segments.next().filter(|s| !s.is_empty())?;
        let project = segments.next().filter(|s| !s.is_empty())?;
        let project = percent_decode_str(project).decode_utf8_lossy().into_owned();
        Some(Self::new(org, project))
    }
}

/// URL builder for the REST endpoints under a service root.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// Validate `base` as an http(s) service root.
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| Error::Config(format!("invalid base URL '{}': {}", base, e)))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "base URL must be http(s): {}",
                base
            )));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn project_url(&self, ctx: &AdoContext, tail: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&ctx.org)
                .push(&ctx.project)
                .extend(tail);
        }
        url
    }

    fn api_url(&self, ctx: &AdoContext, tail: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.project_url(ctx, tail);
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Area tree, one level deep.
    pub fn area_nodes(&self, ctx: &AdoContext) -> Url {
        self.api_url(
            ctx,
            &["_apis", "wit", "classificationnodes", "areas"],
            &[("$depth", "1"), ("api-version", CLASSIFICATION_API_VERSION)],
        )
    }

    /// Iteration tree, four levels deep.
    pub fn iteration_nodes(&self, ctx: &AdoContext) -> Url {
        self.api_url(
            ctx,
            &["_apis", "wit", "classificationnodes", "iterations"],
            &[("$depth", "4"), ("api-version", CLASSIFICATION_API_VERSION)],
        )
    }

    pub fn wiql(&self, ctx: &AdoContext) -> Url {
        self.api_url(
            ctx,
            &["_apis", "wit", "wiql"],
            &[("api-version", WIQL_API_VERSION)],
        )
    }

    pub fn work_items_batch(&self, ctx: &AdoContext) -> Url {
        self.api_url(
            ctx,
            &["_apis", "wit", "workitemsbatch"],
            &[("api-version", BATCH_API_VERSION)],
        )
    }

    pub fn work_item(&self, ctx: &AdoContext, id: u64) -> Url {
        let id = id.to_string();
        self.api_url(
            ctx,
            &["_apis", "wit", "workitems", id.as_str()],
            &[("api-version", WORK_ITEM_API_VERSION)],
        )
    }

    /// Single work item read limited to `fields`.
    pub fn work_item_fields(&self, ctx: &AdoContext, id: u64, fields: &[&str]) -> Url {
        let id = id.to_string();
        let fields = fields.join(",");
        self.api_url(
            ctx,
            &["_apis", "wit", "workitems", id.as_str()],
            &[("fields", fields.as_str()), ("api-version", WORK_ITEM_API_VERSION)],
        )
    }

    /// Web page for editing a work item.
    pub fn work_item_edit_page(&self, ctx: &AdoContext, id: u64) -> Url {
        let id = id.to_string();
        self.project_url(ctx, &["_workitems", "edit", id.as_str()])
    }
}

/// A transport bound to a service root.
#[derive(Clone)]
pub struct AdoClient {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
}

impl AdoClient {
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

impl std::fmt::Debug for AdoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdoClient")
            .field("base", &self.endpoints.base.as_str())
            .finish()
    }
}
