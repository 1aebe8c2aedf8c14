use std::path::PathBuf;

use thiserror::Error;

/// Unrecoverable configuration problems. The only failure that aborts a
/// bootstrap; raised before any asynchronous work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid mount target {0:?}: expected a CSS selector such as '#map'")]
    InvalidTarget(String),
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid projection extent {0:?}")]
    InvalidExtent([f64; 4]),
}

/// A remote lookup that did not produce a usable payload.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("graphql error: {0}")]
    GraphQl(String),
    #[error("no data returned")]
    NoData,
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// A layer descriptor that cannot become a live layer.
#[derive(Debug, Error, PartialEq)]
pub enum LayerError {
    #[error("layer {layer}: no source named {source_name}")]
    UnknownSource { layer: String, source_name: String },
    #[error("layer {0}: duplicate name")]
    Duplicate(String),
}
