use std::collections::HashMap;

use tracing::debug;

use crate::models::{
    bare_layer_name, CapabilityResult, LayerDescriptor, LayerSeed, LayerState, LayerType,
    SourceConfig, StyleVariant,
};

/// Combine static layer seeds with capability results and, optionally, a
/// restored per-layer state into the final descriptor list.
///
/// Output order always equals seed order. Saved entries naming no seed are
/// dropped.
pub fn merge(
    seeds: &[LayerSeed],
    sources: &HashMap<String, SourceConfig>,
    capabilities: &CapabilityResult,
    saved: Option<&[(String, LayerState)]>,
) -> Vec<LayerDescriptor> {
    if let Some(saved) = saved {
        for (name, _) in saved {
            let known = seeds
                .iter()
                .any(|seed| seed.name == *name || bare_layer_name(&seed.name) == name);
            if !known {
                debug!(layer = %name, "dropping saved state for unknown layer");
            }
        }
    }

    seeds
        .iter()
        .map(|seed| merge_layer(seed, sources, capabilities, saved))
        .collect()
}

fn merge_layer(
    seed: &LayerSeed,
    sources: &HashMap<String, SourceConfig>,
    capabilities: &CapabilityResult,
    saved: Option<&[(String, LayerState)]>,
) -> LayerDescriptor {
    let bare = bare_layer_name(&seed.name);
    let mut descriptor = LayerDescriptor::from(seed);

    if let Some(saved) = saved {
        let entry = saved
            .iter()
            .find(|(name, _)| *name == seed.name)
            .or_else(|| saved.iter().find(|(name, _)| name == bare));
        match entry {
            Some((_, state)) => overlay(&mut descriptor, state),
            None => {
                descriptor.visible = false;
                descriptor.legend = false;
            }
        }
    }

    descriptor.secure = is_secure(seed, bare, sources, capabilities);
    if descriptor.secure {
        descriptor.visible = false;
    }
    descriptor
}

/// A layer is secure iff its source declares a capabilities endpoint and the
/// result for that source does not list the layer.
pub fn is_secure(
    seed: &LayerSeed,
    bare_name: &str,
    sources: &HashMap<String, SourceConfig>,
    capabilities: &CapabilityResult,
) -> bool {
    let Some(source) = seed.source.as_deref() else {
        return false;
    };
    let declares_endpoint = sources
        .get(source)
        .is_some_and(|config| config.capabilities_url.is_some());
    declares_endpoint
        && capabilities
            .authorized(source)
            .is_some_and(|layers| !layers.contains(bare_name))
}

fn overlay(descriptor: &mut LayerDescriptor, state: &LayerState) {
    if let Some(visible) = state.visible {
        descriptor.visible = visible;
    }
    if let Some(expanded) = state.legend_expanded {
        descriptor.legend = expanded;
    }
    if let Some(opacity) = state.opacity {
        descriptor.opacity = opacity.clamp(0.0, 1.0);
    }
    if let Some(themes) = &state.active_themes {
        descriptor.active_themes = themes.clone();
    }
    if let Some(index) = state.alt_style_index {
        apply_alt_style(descriptor, index);
    }
}

/// Index of the picker's default entry: the first flagged `initialStyle`,
/// else the first entry.
fn default_variant(picker: &[StyleVariant]) -> Option<usize> {
    picker
        .iter()
        .position(|variant| variant.initial_style)
        .or_else(|| (!picker.is_empty()).then_some(0))
}

/// Activate a style picker entry. Used both when merging restored state and
/// when a live layer receives a new state.
///
/// An out-of-range index activates the picker's default entry instead. The
/// style to revert to is always recomputed: WMS layers use the picker's
/// default entry, other layers keep their configured style.
pub fn apply_alt_style(descriptor: &mut LayerDescriptor, index: u32) {
    let fallback = default_variant(&descriptor.style_picker);
    let chosen = match descriptor.style_picker.get(index as usize) {
        Some(_) => index as usize,
        None => match fallback {
            Some(fallback) => {
                debug!(layer = %descriptor.name, index, fallback, "alt style index out of range");
                fallback
            }
            None => {
                debug!(layer = %descriptor.name, index, "layer has no style picker");
                return;
            }
        },
    };

    let variant = &descriptor.style_picker[chosen];
    if variant.style.is_some() {
        descriptor.active_style = variant.style.clone();
    }
    descriptor.cluster_style = variant.cluster_style.clone();
    descriptor.alt_style_index = Some(chosen as u32);
    descriptor.default_style = match descriptor.layer_type {
        LayerType::Wms => fallback.and_then(|i| descriptor.style_picker[i].style.clone()),
        _ => descriptor.configured_style.clone(),
    };
}
