use std::collections::HashMap;
use std::path::Path;

use mapstate_shared::models::{Coordinate, LayerSeed, SourceConfig};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_PROJECTION: &str = "EPSG:3857";

/// A control as listed in the configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDef {
    pub name: String,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub hide_when_embedded: bool,
}

impl ControlDef {
    pub fn new(name: &str) -> Self {
        ControlDef {
            name: name.to_string(),
            options: serde_json::Value::Null,
            hide_when_embedded: false,
        }
    }
}

/// Static viewer configuration.
///
/// Produced once, validated, then shared read-only by every bootstrap run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerConfig {
    pub target: String,
    #[serde(default)]
    pub map: Option<String>,
    #[serde(default)]
    pub center: Option<Coordinate>,
    #[serde(default)]
    pub zoom: Option<f64>,
    #[serde(default)]
    pub start_extent: Option<[f64; 4]>,
    #[serde(default)]
    pub projection_code: Option<String>,
    #[serde(default)]
    pub projection_extent: Option<[f64; 4]>,
    #[serde(default)]
    pub resolutions: Vec<f64>,
    #[serde(default)]
    pub layers: Vec<LayerSeed>,
    #[serde(default)]
    pub source: HashMap<String, SourceConfig>,
    #[serde(default)]
    pub controls: Vec<ControlDef>,
    /// The viewer runs inside another page.
    #[serde(default)]
    pub embedded: bool,
    #[serde(default, rename = "saveOnServerServiceEndPoint")]
    pub save_on_server_service_endpoint: Option<String>,
}

/// Projection and grid the map engine is built with.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub code: String,
    pub extent: Option<[f64; 4]>,
    pub resolutions: Vec<f64>,
}

impl ViewerConfig {
    /// Minimal configuration mounting at `target`.
    pub fn new(target: &str) -> Self {
        ViewerConfig {
            target: target.to_string(),
            map: None,
            center: None,
            zoom: None,
            start_extent: None,
            projection_code: None,
            projection_extent: None,
            resolutions: Vec::new(),
            layers: Vec::new(),
            source: HashMap::new(),
            controls: Vec::new(),
            embedded: false,
            save_on_server_service_endpoint: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            layers = config.layers.len(),
            sources = config.source.len(),
            "Loaded viewer configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_selector(&self.target) {
            return Err(ConfigError::InvalidTarget(self.target.clone()));
        }
        for extent in [self.projection_extent, self.start_extent].into_iter().flatten() {
            if !is_extent(extent) {
                return Err(ConfigError::InvalidExtent(extent));
            }
        }
        Ok(())
    }

    pub fn projection(&self) -> Result<Projection, ConfigError> {
        self.validate()?;
        Ok(Projection {
            code: self
                .projection_code
                .clone()
                .unwrap_or_else(|| DEFAULT_PROJECTION.to_string()),
            extent: self.projection_extent,
            resolutions: self.resolutions.clone(),
        })
    }
}

fn is_selector(target: &str) -> bool {
    let target = target.trim();
    match target.chars().next() {
        Some('#') | Some('.') => target.len() > 1,
        Some(c) => c.is_ascii_alphabetic() || c == '[',
        None => false,
    }
}

fn is_extent([min_x, min_y, max_x, max_y]: [f64; 4]) -> bool {
    [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) && min_x < max_x && min_y < max_y
}
