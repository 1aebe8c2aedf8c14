use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
#[cfg(feature = "uuid-support")]
use uuid::Uuid;

/// A projected map coordinate (x, y).
pub type Coordinate = [f64; 2];

/// Per-layer part of a [`MapState`]. Every field is optional: only what was
/// explicitly captured or restored is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legend_expanded: Option<bool>,
    /// Opacity in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    /// Index into the layer's style picker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_style_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_themes: Option<Vec<String>>,
}

/// State carried for a single control.
///
/// `Raw` holds a payload that was not valid JSON; it is kept verbatim so a
/// broken control never takes the rest of the state down with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Json(serde_json::Value),
    Raw(String),
}

/// What the map currently shows, in the shape shared by URL fragments and
/// server-persisted records.
///
/// Ordered fields (`layers`, `controls`, `extra`) keep insertion order and
/// unique keys; use the setters to preserve that.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapState {
    pub center: Option<Coordinate>,
    pub zoom: Option<f64>,
    pub layers: Vec<(String, LayerState)>,
    pub legend: Vec<String>,
    pub pin: Option<Coordinate>,
    /// `"<layerName>.<featureId>"`
    pub feature: Option<String>,
    pub map: Option<String>,
    pub controls: Vec<(String, ControlValue)>,
    /// Top-level keys this version does not interpret, kept as raw text.
    pub extra: Vec<(String, String)>,
}

fn upsert<T>(entries: &mut Vec<(String, T)>, key: &str, value: T) {
    match entries.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key.to_string(), value)),
    }
}

fn lookup<'a, T>(entries: &'a [(String, T)], key: &str) -> Option<&'a T> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

impl MapState {
    pub fn is_empty(&self) -> bool {
        *self == MapState::default()
    }

    pub fn layer(&self, name: &str) -> Option<&LayerState> {
        lookup(&self.layers, name)
    }

    /// Layers without a name cannot be addressed and are ignored.
    pub fn set_layer(&mut self, name: &str, state: LayerState) {
        if name.is_empty() {
            tracing::debug!("ignoring unnamed layer state");
            return;
        }
        upsert(&mut self.layers, name, state);
    }

    pub fn control(&self, name: &str) -> Option<&ControlValue> {
        lookup(&self.controls, name)
    }

    pub fn set_control(&mut self, name: &str, value: ControlValue) {
        upsert(&mut self.controls, name, value);
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        lookup(&self.extra, key).map(String::as_str)
    }

    pub fn set_extra(&mut self, key: &str, value: String) {
        upsert(&mut self.extra, key, value);
    }

    /// Split `feature` into `(layer name, feature id)`.
    pub fn feature_ref(&self) -> Option<(&str, &str)> {
        let (layer, id) = self.feature.as_deref()?.split_once('.')?;
        if layer.is_empty() || id.is_empty() {
            return None;
        }
        Some((layer, id))
    }
}

/// A named data source in the viewer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Endpoint listing the layers this source currently authorizes.
    #[serde(default, rename = "capabilitiesURL")]
    pub capabilities_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayerType {
    Wms,
    Wfs,
    Wmts,
    Xyz,
    Geojson,
    Group,
    #[default]
    #[serde(other)]
    Other,
}

/// One entry of a layer's style picker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleVariant {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub cluster_style: Option<String>,
    #[serde(default)]
    pub initial_style: bool,
}

fn default_opacity() -> f64 {
    1.0
}

/// A layer as written in the static configuration, before capabilities and
/// restored state are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSeed {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "type")]
    pub layer_type: LayerType,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub style_picker: Vec<StyleVariant>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub legend: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default)]
    pub active_themes: Vec<String>,
}

impl LayerSeed {
    pub fn new(name: &str) -> Self {
        LayerSeed {
            name: name.to_string(),
            id: None,
            source: None,
            layer_type: LayerType::default(),
            style: None,
            style_picker: Vec::new(),
            visible: false,
            legend: false,
            opacity: default_opacity(),
            active_themes: Vec::new(),
        }
    }
}

/// Fully resolved, ready-to-instantiate layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub name: String,
    pub id: Option<String>,
    pub source_ref: Option<String>,
    pub layer_type: LayerType,
    pub style_picker: Vec<StyleVariant>,
    /// The capability check did not authorize this layer.
    pub secure: bool,
    pub visible: bool,
    pub legend: bool,
    pub opacity: f64,
    pub active_style: Option<String>,
    pub cluster_style: Option<String>,
    /// The `style` of the static configuration; never changes.
    pub configured_style: Option<String>,
    /// Style the layer falls back to when the alternate style is switched off.
    pub default_style: Option<String>,
    pub alt_style_index: Option<u32>,
    pub active_themes: Vec<String>,
}

impl From<&LayerSeed> for LayerDescriptor {
    fn from(seed: &LayerSeed) -> Self {
        LayerDescriptor {
            name: seed.name.clone(),
            id: seed.id.clone(),
            source_ref: seed.source.clone(),
            layer_type: seed.layer_type,
            style_picker: seed.style_picker.clone(),
            secure: false,
            visible: seed.visible,
            legend: seed.legend,
            opacity: seed.opacity.clamp(0.0, 1.0),
            active_style: seed.style.clone(),
            cluster_style: None,
            configured_style: seed.style.clone(),
            default_style: seed.style.clone(),
            alt_style_index: None,
            active_themes: seed.active_themes.clone(),
        }
    }
}

/// Strip a namespace prefix (`ns:name`) and a trailing `__` disambiguation
/// suffix (`name__2`) from a layer name.
pub fn bare_layer_name(name: &str) -> &str {
    let name = name.rsplit(':').next().unwrap_or(name);
    match name.rfind("__") {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Response of a capability endpoint for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCapabilities {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Layers each source currently authorizes.
///
/// A source with no entry is unrestricted; an entry with an empty set
/// authorizes nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityResult {
    sources: HashMap<String, HashSet<String>>,
}

impl CapabilityResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, S>(&mut self, source: &str, layers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources
            .insert(source.to_string(), layers.into_iter().map(Into::into).collect());
    }

    pub fn authorized(&self, source: &str) -> Option<&HashSet<String>> {
        self.sources.get(source)
    }

    pub fn is_restricted(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    pub fn permits(&self, source: &str, layer: &str) -> bool {
        self.sources
            .get(source)
            .map_or(true, |layers| layers.contains(layer))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl FromIterator<SourceCapabilities> for CapabilityResult {
    fn from_iter<T: IntoIterator<Item = SourceCapabilities>>(iter: T) -> Self {
        let mut result = CapabilityResult::new();
        for caps in iter {
            result.insert(&caps.name, caps.capabilities);
        }
        result
    }
}

/// A map state persisted on the server.
#[cfg(feature = "uuid-support")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMapState {
    pub id: Uuid,
    pub record: serde_json::Map<String, serde_json::Value>,
    pub created_at: String,
}
