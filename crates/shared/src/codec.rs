//! Textual encoding of a [`MapState`], as carried in URL fragments.
//!
//! Format: `key=value&key=value...` with percent-encoded values. Reserved keys
//! are `center`, `zoom`, `layers`, `legend`, `pin`, `feature`, `map` and the
//! `controls.<name>` family. The `layers` value nests its own grammar:
//! `name[,v=0|1][,s=0|1][,o=0-100][,sn=N][,th=a~b]` per layer, all joined by `,`.
//!
//! Coordinates are rounded to integers and opacity to whole percents; both
//! losses are accepted.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use tracing::debug;
use url::Url;

use crate::models::{ControlValue, Coordinate, LayerState, MapState};

/// Everything outside the RFC 3986 unreserved set.
const VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Separators of the nested layers grammar.
const LAYER_TOKEN: &AsciiSet = &CONTROLS.add(b',').add(b'=').add(b'~').add(b'%');

const LIST_TOKEN: &AsciiSet = &CONTROLS.add(b',').add(b'%');

const CONTROLS_PREFIX: &str = "controls.";

fn escape(text: &str, set: &'static AsciiSet) -> String {
    utf8_percent_encode(text, set).to_string()
}

/// Percent-decode, replacing invalid UTF-8.
fn unescape(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// Encode a map state. Absent and empty fields are omitted.
pub fn encode(state: &MapState) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();

    if let Some(center) = state.center {
        pairs.push(("center".to_string(), format_coordinate(center)));
    }
    if let Some(zoom) = state.zoom {
        pairs.push(("zoom".to_string(), escape(&zoom.to_string(), VALUE)));
    }
    if state.layers.iter().any(|(name, _)| !name.is_empty()) {
        let layers = state
            .layers
            .iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, layer)| encode_layer(name, layer))
            .collect::<Vec<_>>()
            .join(",");
        pairs.push(("layers".to_string(), escape(&layers, VALUE)));
    }
    if !state.legend.is_empty() {
        let legend = join_list(&state.legend, ",", LIST_TOKEN);
        pairs.push(("legend".to_string(), escape(&legend, VALUE)));
    }
    if let Some(pin) = state.pin {
        pairs.push(("pin".to_string(), format_coordinate(pin)));
    }
    if let Some(feature) = state.feature.as_deref().filter(|f| !f.is_empty()) {
        pairs.push(("feature".to_string(), escape(feature, VALUE)));
    }
    if let Some(map) = state.map.as_deref().filter(|m| !m.is_empty()) {
        pairs.push(("map".to_string(), escape(map, VALUE)));
    }
    for (key, value) in &state.extra {
        pairs.push((escape(key, VALUE), escape(value, VALUE)));
    }
    for (name, value) in &state.controls {
        let payload = match value {
            ControlValue::Json(json) => json.to_string(),
            ControlValue::Raw(raw) => raw.clone(),
        };
        pairs.push((
            format!("{CONTROLS_PREFIX}{}", escape(name, VALUE)),
            escape(&payload, VALUE),
        ));
    }

    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Decode a fragment (with or without its leading `#`).
///
/// Never fails: segments without `=` and fields that do not parse are
/// skipped one by one, the rest of the state still decodes.
pub fn decode(text: &str) -> MapState {
    let text = text.strip_prefix('#').unwrap_or(text);
    let mut state = MapState::default();

    for segment in text.split('&') {
        let Some((key, raw)) = segment.split_once('=') else {
            if !segment.is_empty() {
                debug!(segment, "ignoring fragment segment without '='");
            }
            continue;
        };
        apply_pair(&mut state, &unescape(key), unescape(raw));
    }

    state
}

/// Decode the fragment of a URL, or `None` when it has none.
pub fn parse_url(url: &Url) -> Option<MapState> {
    url.fragment()
        .filter(|fragment| !fragment.is_empty())
        .map(decode)
}

fn apply_pair(state: &mut MapState, key: &str, value: String) {
    match key {
        "center" => match parse_coordinate(&value) {
            Some(center) => state.center = Some(center),
            None => debug!(value = %value, "ignoring malformed center"),
        },
        "zoom" => match parse_zoom(&value) {
            Some(zoom) => state.zoom = Some(zoom),
            None => debug!(value = %value, "ignoring malformed zoom"),
        },
        "layers" => state.layers = decode_layers(&value),
        "legend" => state.legend = split_list(&value, ','),
        "pin" => match parse_coordinate(&value) {
            Some(pin) => state.pin = Some(pin),
            None => debug!(value = %value, "ignoring malformed pin"),
        },
        "feature" => state.feature = Some(value).filter(|v| !v.is_empty()),
        "map" => state.map = Some(value).filter(|v| !v.is_empty()),
        _ => match key.strip_prefix(CONTROLS_PREFIX) {
            Some(name) => state.set_control(name, parse_control(value)),
            None => state.set_extra(key, value),
        },
    }
}

/// Parse a control payload, keeping the raw text when it is not JSON.
pub fn parse_control(payload: String) -> ControlValue {
    match serde_json::from_str(&payload) {
        Ok(json) => ControlValue::Json(json),
        Err(err) => {
            debug!(error = %err, "control payload is not JSON, keeping raw text");
            ControlValue::Raw(payload)
        }
    }
}

fn format_coordinate([x, y]: Coordinate) -> String {
    format!("{},{}", x.round() as i64, y.round() as i64)
}

/// Parse `"x,y"`.
pub fn parse_coordinate(text: &str) -> Option<Coordinate> {
    let (x, y) = text.split_once(',')?;
    let x: f64 = x.trim().parse().ok()?;
    let y: f64 = y.trim().parse().ok()?;
    (x.is_finite() && y.is_finite()).then_some([x, y])
}

pub fn parse_zoom(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|z| z.is_finite() && *z >= 0.0)
}

fn join_list(items: &[String], separator: &str, set: &'static AsciiSet) -> String {
    items
        .iter()
        .map(|item| escape(item, set))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Split a separator-joined list of escaped tokens, dropping empty ones.
pub fn split_list(text: &str, separator: char) -> Vec<String> {
    text.split(separator)
        .filter(|token| !token.is_empty())
        .map(unescape)
        .collect()
}

fn opacity_percent(opacity: f64) -> u8 {
    (opacity.clamp(0.0, 1.0) * 100.0).round() as u8
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn encode_layer(name: &str, layer: &LayerState) -> String {
    // name always leads its segment
    let mut segment = escape(name, LAYER_TOKEN);
    if let Some(visible) = layer.visible {
        segment.push_str(",v=");
        segment.push_str(flag(visible));
    }
    if let Some(expanded) = layer.legend_expanded {
        segment.push_str(",s=");
        segment.push_str(flag(expanded));
    }
    if let Some(opacity) = layer.opacity {
        segment.push_str(&format!(",o={}", opacity_percent(opacity)));
    }
    if let Some(index) = layer.alt_style_index {
        segment.push_str(&format!(",sn={index}"));
    }
    if let Some(themes) = &layer.active_themes {
        let themes: Vec<String> = themes.iter().filter(|t| !t.is_empty()).cloned().collect();
        segment.push_str(",th=");
        segment.push_str(&join_list(&themes, "~", LAYER_TOKEN));
    }
    segment
}

/// Decode the (already unescaped) value of the `layers` key.
pub fn decode_layers(text: &str) -> Vec<(String, LayerState)> {
    let mut layers: Vec<(String, LayerState)> = Vec::new();
    let mut current: Option<usize> = None;

    for token in text.split(',') {
        match token.split_once('=') {
            None if token.is_empty() => {}
            None => {
                let name = unescape(token);
                let idx = match layers.iter().position(|(n, _)| *n == name) {
                    Some(idx) => {
                        layers[idx].1 = LayerState::default();
                        idx
                    }
                    None => {
                        layers.push((name, LayerState::default()));
                        layers.len() - 1
                    }
                };
                current = Some(idx);
            }
            Some((field, raw)) => {
                let Some(idx) = current else {
                    debug!(token, "layer field before any layer name");
                    continue;
                };
                if apply_layer_field(&mut layers[idx].1, field, raw).is_none() {
                    debug!(layer = %layers[idx].0, field, raw, "ignoring layer field");
                }
            }
        }
    }

    layers
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

fn apply_layer_field(layer: &mut LayerState, field: &str, raw: &str) -> Option<()> {
    match field {
        "v" => layer.visible = Some(parse_flag(raw)?),
        "s" => layer.legend_expanded = Some(parse_flag(raw)?),
        "o" => {
            let percent: u8 = raw.parse().ok().filter(|p| *p <= 100)?;
            layer.opacity = Some(f64::from(percent) / 100.0);
        }
        "sn" => layer.alt_style_index = Some(raw.parse().ok()?),
        "th" => layer.active_themes = Some(split_list(raw, '~')),
        _ => return None,
    }
    Some(())
}
