//! Sprintplanner - planning overlay engine for Azure DevOps boards.
//!
//! This library provides the core functionality for the `sp` CLI tool:
//! trigger injection into the host page, the cross-context message bridge
//! between the host and the planning surface, and the fetch/mutation
//! pipeline against the work item REST API.

pub mod ado;
pub mod bridge;
pub mod cli;
pub mod commands;
pub mod config;
pub mod inject;


/// Library-level error type for Sprintplanner operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] ado::http::TransportError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Sprintplanner operations.
pub type Result<T> = std::result::Result<T, Error>;
