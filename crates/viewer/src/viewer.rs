//! The live viewer: layer and control registry, view, restored selection,
//! and the signals collaborators observe.

use std::collections::{HashMap, HashSet};

use mapstate_shared::codec;
use mapstate_shared::merge;
use mapstate_shared::models::{
    bare_layer_name, ControlValue, Coordinate, LayerDescriptor, LayerState, LayerType, MapState,
    SourceConfig,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::config::{ControlDef, Projection, ViewerConfig};
use crate::error::LayerError;

/// Controls never shown while embedded, whatever the configuration says.
pub const SUPPRESSED_WHEN_EMBEDDED: [&str; 5] =
    ["sharemap", "link", "about", "print", "draganddrop"];

const SELECTION_KEY: &str = "selection";

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    AddLayer { layer_name: String },
    RemoveLayer { layer_name: String },
    StateChange(MapState),
    Ready,
}

/// Records every emitted event and forwards it to live subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<ViewerEvent>,
    subscribers: Vec<mpsc::UnboundedSender<ViewerEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: ViewerEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        self.events.push(event);
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ViewerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn events(&self) -> &[ViewerEvent] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<ViewerEvent> {
        std::mem::take(&mut self.events)
    }
}

/// A live map layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    descriptor: LayerDescriptor,
    /// Ids of loaded features; `None` until the layer reports them.
    features: Option<HashSet<String>>,
}

impl Layer {
    pub fn from_descriptor(
        descriptor: LayerDescriptor,
        sources: &HashMap<String, SourceConfig>,
    ) -> Result<Self, LayerError> {
        if let Some(source) = &descriptor.source_ref {
            if !sources.contains_key(source) {
                return Err(LayerError::UnknownSource {
                    layer: descriptor.name.clone(),
                    source_name: source.clone(),
                });
            }
        }
        Ok(Layer {
            descriptor,
            features: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &LayerDescriptor {
        &self.descriptor
    }

    pub fn is_visible(&self) -> bool {
        self.descriptor.visible
    }

    pub fn is_secure(&self) -> bool {
        self.descriptor.secure
    }

    pub fn features_loaded(&self) -> bool {
        self.features.is_some()
    }

    /// Id under which a restored feature is looked up in this layer.
    ///
    /// WFS features carry the layer's bare name as prefix; group layers hold
    /// no features of their own.
    pub fn feature_lookup_id(&self, feature_id: &str) -> Option<String> {
        match self.descriptor.layer_type {
            LayerType::Group => None,
            LayerType::Wfs => Some(format!(
                "{}.{}",
                bare_layer_name(&self.descriptor.name),
                feature_id
            )),
            _ => Some(feature_id.to_string()),
        }
    }

    fn has_feature(&self, lookup_id: &str) -> bool {
        self.features
            .as_ref()
            .is_some_and(|features| features.contains(lookup_id))
    }

    fn snapshot(&self) -> LayerState {
        let d = &self.descriptor;
        LayerState {
            visible: Some(d.visible),
            legend_expanded: Some(d.legend),
            opacity: Some(d.opacity),
            alt_style_index: d.alt_style_index,
            active_themes: (!d.active_themes.is_empty()).then(|| d.active_themes.clone()),
        }
    }

    /// Secure layers never become visible.
    fn apply(&mut self, state: &LayerState) {
        let d = &mut self.descriptor;
        if let Some(visible) = state.visible {
            d.visible = visible && !d.secure;
        }
        if let Some(expanded) = state.legend_expanded {
            d.legend = expanded;
        }
        if let Some(opacity) = state.opacity {
            d.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(themes) = &state.active_themes {
            d.active_themes = themes.clone();
        }
        if let Some(index) = state.alt_style_index {
            merge::apply_alt_style(d, index);
        }
    }
}

/// A control registered with the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub name: String,
    pub options: serde_json::Value,
    pub hidden: bool,
    /// Mounted in the map UI. Suppressed controls are built but not mounted.
    pub attached: bool,
    pub state: Option<ControlValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionGeometry {
    pub geometry_type: String,
    pub coordinates: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionManager {
    pub saved_selection: Option<SelectionGeometry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureInfo {
    pub saved_pin: Option<Coordinate>,
    /// `(layer name, feature id)` currently highlighted.
    pub shown: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FitTarget {
    Extent([f64; 4]),
    Feature { layer: String, lookup_id: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct View {
    pub center: Option<Coordinate>,
    pub zoom: Option<f64>,
    pub fitted: Option<FitTarget>,
}

/// A feature restoration waiting for its layer's features.
#[derive(Debug, Clone, PartialEq)]
struct PendingFeature {
    layer: String,
    feature_id: String,
    fit: bool,
}

#[derive(Debug)]
pub struct Viewer {
    generation: u64,
    map_name: Option<String>,
    embedded: bool,
    projection: Projection,
    sources: HashMap<String, SourceConfig>,
    layers: Vec<Layer>,
    controls: Vec<Control>,
    view: View,
    legend: Vec<String>,
    selection: Option<SelectionManager>,
    feature_info: Option<FeatureInfo>,
    pending_feature: Option<PendingFeature>,
    ready: bool,
    bus: EventBus,
}

impl Viewer {
    pub fn new(
        generation: u64,
        config: &ViewerConfig,
        projection: Projection,
        map_name: Option<String>,
    ) -> Self {
        Viewer {
            generation,
            map_name,
            embedded: config.embedded,
            projection,
            sources: config.source.clone(),
            layers: Vec::new(),
            controls: Vec::new(),
            view: View {
                center: config.center,
                zoom: config.zoom,
                fitted: None,
            },
            legend: Vec::new(),
            selection: None,
            feature_info: None,
            pending_feature: None,
            ready: false,
            bus: EventBus::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn map_name(&self) -> Option<&str> {
        self.map_name.as_deref()
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn set_view(&mut self, center: Option<Coordinate>, zoom: Option<f64>) {
        if center.is_some() {
            self.view.center = center;
        }
        if zoom.is_some() {
            self.view.zoom = zoom;
        }
    }

    pub fn legend(&self) -> &[String] {
        &self.legend
    }

    pub fn set_legend(&mut self, legend: Vec<String>) {
        self.legend = legend;
    }

    // --- layers ---

    pub fn add_layer(&mut self, descriptor: LayerDescriptor) -> Result<(), LayerError> {
        if self.layer(&descriptor.name).is_some() {
            return Err(LayerError::Duplicate(descriptor.name));
        }
        let layer = Layer::from_descriptor(descriptor, &self.sources)?;
        let layer_name = layer.name().to_string();
        self.layers.push(layer);
        self.bus.emit(ViewerEvent::AddLayer { layer_name });
        Ok(())
    }

    pub fn remove_layer(&mut self, name: &str) -> Option<Layer> {
        let idx = self.layers.iter().position(|l| l.name() == name)?;
        let layer = self.layers.remove(idx);
        self.bus.emit(ViewerEvent::RemoveLayer {
            layer_name: layer.name().to_string(),
        });
        Some(layer)
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name() == name)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Exact name first, then the bare name of each layer.
    fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.name() == name)
            .or_else(|| {
                self.layers
                    .iter()
                    .position(|l| bare_layer_name(l.name()) == name)
            })
    }

    // --- subsystems ---

    /// Construct selection and feature-info handling with what the URL
    /// asked to restore. A pin wins over a selection geometry.
    pub fn attach_subsystems(
        &mut self,
        pin: Option<Coordinate>,
        selection: Option<SelectionGeometry>,
    ) {
        let saved_selection = match (pin, selection) {
            (Some(_), Some(_)) => {
                debug!("pin given, ignoring saved selection");
                None
            }
            (_, selection) => selection,
        };
        self.selection = Some(SelectionManager { saved_selection });
        self.feature_info = Some(FeatureInfo {
            saved_pin: pin,
            shown: None,
        });
    }

    pub fn selection(&self) -> Option<&SelectionManager> {
        self.selection.as_ref()
    }

    pub fn feature_info(&self) -> Option<&FeatureInfo> {
        self.feature_info.as_ref()
    }

    // --- controls ---

    pub fn add_control(&mut self, def: &ControlDef, restored: Option<ControlValue>) {
        let suppressed = SUPPRESSED_WHEN_EMBEDDED.contains(&def.name.as_str());
        let control = Control {
            name: def.name.clone(),
            options: def.options.clone(),
            hidden: self.embedded && (def.hide_when_embedded || suppressed),
            attached: !(self.embedded && suppressed),
            state: restored,
        };
        match self.controls.iter_mut().find(|c| c.name == control.name) {
            Some(existing) => *existing = control,
            None => self.controls.push(control),
        }
    }

    pub fn control(&self, name: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.name == name)
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    /// Queryable for hidden and suppressed controls too.
    pub fn control_state(&self, name: &str) -> Option<&ControlValue> {
        self.control(name)?.state.as_ref()
    }

    // --- features and view ---

    /// Highlight a feature now if its layer has loaded, else once it does.
    /// Returns whether it was shown immediately.
    pub fn restore_feature(&mut self, layer_name: &str, feature_id: &str, fit: bool) -> bool {
        let Some(idx) = self.layer_index(layer_name) else {
            debug!(layer = %layer_name, "feature refers to unknown layer");
            return false;
        };
        let layer = &self.layers[idx];
        let Some(lookup_id) = layer.feature_lookup_id(feature_id) else {
            debug!(layer = %layer_name, "layer holds no features");
            return false;
        };
        if !layer.features_loaded() {
            self.pending_feature = Some(PendingFeature {
                layer: layer.name().to_string(),
                feature_id: feature_id.to_string(),
                fit,
            });
            return false;
        }
        if !layer.has_feature(&lookup_id) {
            debug!(layer = %layer_name, feature = %lookup_id, "feature no longer present");
            return false;
        }
        let layer_name = layer.name().to_string();
        self.show_feature(layer_name, feature_id, lookup_id, fit);
        true
    }

    /// Collaborator callback: a layer finished loading its features.
    pub fn features_loaded<I>(&mut self, layer_name: &str, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let Some(idx) = self.layers.iter().position(|l| l.name() == layer_name) else {
            return;
        };
        self.layers[idx].features = Some(ids.into_iter().collect());

        let waiting = self
            .pending_feature
            .as_ref()
            .is_some_and(|pending| pending.layer == layer_name);
        if !waiting {
            return;
        }
        if let Some(pending) = self.pending_feature.take() {
            self.restore_feature(&pending.layer, &pending.feature_id, pending.fit);
        }
    }

    fn show_feature(&mut self, layer: String, feature_id: &str, lookup_id: String, fit: bool) {
        debug!(layer = %layer, feature = %lookup_id, "showing restored feature");
        if fit {
            self.view.fitted = Some(FitTarget::Feature {
                layer: layer.clone(),
                lookup_id,
            });
        }
        self.feature_info
            .get_or_insert_with(FeatureInfo::default)
            .shown = Some((layer, feature_id.to_string()));
    }

    pub fn has_pending_feature(&self) -> bool {
        self.pending_feature.is_some()
    }

    pub fn fit_extent(&mut self, extent: [f64; 4]) {
        self.view.fitted = Some(FitTarget::Extent(extent));
    }

    // --- signals ---

    /// Emits `Ready` the first time only.
    pub fn mark_ready(&mut self) {
        if self.ready {
            return;
        }
        self.ready = true;
        info!(generation = self.generation, layers = self.layers.len(), "Viewer ready");
        self.bus.emit(ViewerEvent::Ready);
    }

    pub fn events(&self) -> &[ViewerEvent] {
        self.bus.events()
    }

    pub fn drain_events(&mut self) -> Vec<ViewerEvent> {
        self.bus.drain()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ViewerEvent> {
        self.bus.subscribe()
    }

    // --- state ---

    /// The single path through which any state reaches the live viewer.
    ///
    /// References to layers or controls the viewer does not have are dropped.
    pub fn apply_state(&mut self, state: MapState) {
        self.bus.emit(ViewerEvent::StateChange(state.clone()));

        for (name, layer_state) in &state.layers {
            match self.layer_index(name) {
                Some(idx) => self.layers[idx].apply(layer_state),
                None => debug!(layer = %name, "state refers to unknown layer"),
            }
        }
        self.set_view(state.center, state.zoom);
        if !state.legend.is_empty() {
            self.legend = state.legend.clone();
        }
        if let Some(pin) = state.pin {
            self.feature_info
                .get_or_insert_with(FeatureInfo::default)
                .saved_pin = Some(pin);
        }
        if let Some((layer, id)) = state.feature_ref() {
            self.restore_feature(layer, id, false);
        }
        for (name, value) in state.controls {
            match self.controls.iter_mut().find(|c| c.name == name) {
                Some(control) => control.state = Some(value),
                None => debug!(control = %name, "state refers to unknown control"),
            }
        }
    }

    /// Snapshot of what the viewer shows. Layers neither visible nor with
    /// an expanded legend are left out.
    pub fn current_state(&self) -> MapState {
        let mut state = MapState {
            center: self.view.center,
            zoom: self.view.zoom,
            legend: self.legend.clone(),
            map: self.map_name.clone(),
            ..Default::default()
        };
        for layer in &self.layers {
            if layer.is_visible() || layer.descriptor.legend {
                state.set_layer(layer.name(), layer.snapshot());
            }
        }
        if let Some(info) = &self.feature_info {
            state.pin = info.saved_pin;
            state.feature = info
                .shown
                .as_ref()
                .map(|(layer, id)| format!("{layer}.{id}"));
        }
        if let Some(selection) = self
            .selection
            .as_ref()
            .and_then(|s| s.saved_selection.as_ref())
        {
            if let Ok(json) = serde_json::to_string(selection) {
                state.set_extra(SELECTION_KEY, json);
            }
        }
        for control in &self.controls {
            if let Some(value) = &control.state {
                state.set_control(&control.name, value.clone());
            }
        }
        state
    }

    /// `base` with the current state as fragment.
    pub fn permalink(&self, base: &Url) -> Url {
        let mut link = base.clone();
        link.set_fragment(Some(&codec::encode(&self.current_state())));
        link
    }
}
