//! Normalization between persisted server records and [`MapState`].
//!
//! Records are loosely typed: a field may arrive structured (`"center": [1, 2]`)
//! or in its textual form (`"center": "1,2"`). Each field is matched on its
//! JSON shape once, here, so nothing downstream re-checks it.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::codec;
use crate::models::{ControlValue, Coordinate, LayerState, MapState};

impl MapState {
    /// Normalize a server-native record.
    pub fn from_record(record: &Map<String, Value>) -> MapState {
        let mut state = MapState::default();

        for (key, value) in record {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "center" => state.center = coordinate_from(key, value),
                "pin" => state.pin = coordinate_from(key, value),
                "zoom" => {
                    state.zoom = match value {
                        Value::Number(n) => n.as_f64().filter(|z| z.is_finite() && *z >= 0.0),
                        Value::String(text) => codec::parse_zoom(text),
                        _ => None,
                    }
                }
                "layers" => state.layers = layers_from(value),
                "legend" => {
                    state.legend = match value {
                        Value::Array(items) => items.iter().filter_map(text_from).collect(),
                        Value::String(text) => codec::split_list(text, ','),
                        _ => Vec::new(),
                    }
                }
                "feature" => state.feature = text_from(value).filter(|f| !f.is_empty()),
                "map" => state.map = text_from(value).filter(|m| !m.is_empty()),
                "controls" => match value {
                    Value::Object(controls) => {
                        for (name, control) in controls {
                            state.set_control(name, ControlValue::Json(control.clone()));
                        }
                    }
                    other => debug!(value = %other, "ignoring non-object controls"),
                },
                _ => match key.strip_prefix("controls.") {
                    Some(name) => {
                        let control = match value {
                            Value::String(text) => codec::parse_control(text.clone()),
                            other => ControlValue::Json(other.clone()),
                        };
                        state.set_control(name, control);
                    }
                    None => {
                        if let Some(text) = text_from(value) {
                            state.set_extra(key, text);
                        }
                    }
                },
            }
        }

        state
    }

    /// Structured record form, as stored by the server.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();

        if let Some([x, y]) = self.center {
            record.insert("center".to_string(), json!([x, y]));
        }
        if let Some(zoom) = self.zoom {
            record.insert("zoom".to_string(), json!(zoom));
        }
        if !self.layers.is_empty() {
            let layers: Map<String, Value> = self
                .layers
                .iter()
                .map(|(name, layer)| {
                    (
                        name.clone(),
                        serde_json::to_value(layer).unwrap_or_default(),
                    )
                })
                .collect();
            record.insert("layers".to_string(), Value::Object(layers));
        }
        if !self.legend.is_empty() {
            record.insert("legend".to_string(), json!(self.legend));
        }
        if let Some([x, y]) = self.pin {
            record.insert("pin".to_string(), json!([x, y]));
        }
        if let Some(feature) = &self.feature {
            record.insert("feature".to_string(), json!(feature));
        }
        if let Some(map) = &self.map {
            record.insert("map".to_string(), json!(map));
        }
        if !self.controls.is_empty() {
            let controls: Map<String, Value> = self
                .controls
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        ControlValue::Json(json) => json.clone(),
                        ControlValue::Raw(raw) => Value::String(raw.clone()),
                    };
                    (name.clone(), value)
                })
                .collect();
            record.insert("controls".to_string(), Value::Object(controls));
        }
        for (key, value) in &self.extra {
            record.insert(key.clone(), Value::String(value.clone()));
        }

        record
    }
}

/// Scalars as text; structured values are rejected.
fn text_from(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coordinate_from(key: &str, value: &Value) -> Option<Coordinate> {
    let coordinate = match value {
        Value::Array(items) if items.len() == 2 => {
            match (items[0].as_f64(), items[1].as_f64()) {
                (Some(x), Some(y)) => Some([x, y]),
                _ => None,
            }
        }
        Value::String(text) => codec::parse_coordinate(text),
        _ => None,
    };
    if coordinate.is_none() {
        debug!(key, value = %value, "ignoring malformed coordinate");
    }
    coordinate
}

fn layers_from(value: &Value) -> Vec<(String, LayerState)> {
    match value {
        Value::String(text) => codec::decode_layers(text),
        Value::Object(layers) => layers
            .iter()
            .filter_map(|(name, layer)| {
                match serde_json::from_value::<LayerState>(layer.clone()) {
                    Ok(mut state) => {
                        state.opacity = state.opacity.map(|o| o.clamp(0.0, 1.0));
                        Some((name.clone(), state))
                    }
                    Err(err) => {
                        debug!(layer = %name, error = %err, "ignoring malformed layer record");
                        None
                    }
                }
            })
            .collect(),
        other => {
            debug!(value = %other, "ignoring malformed layers");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_from_record_structured() {
        let state = MapState::from_record(&record(json!({
            "center": [100.6, 200.2],
            "zoom": 4,
            "layers": {"roads": {"visible": true, "opacity": 0.5}},
            "legend": ["expanded"],
            "map": "city",
            "controls": {"measure": {"active": false}}
        })));
        assert_eq!(state.center, Some([100.6, 200.2]));
        assert_eq!(state.zoom, Some(4.0));
        assert_eq!(state.layer("roads").unwrap().visible, Some(true));
        assert_eq!(state.layer("roads").unwrap().opacity, Some(0.5));
        assert_eq!(state.legend, vec!["expanded"]);
        assert_eq!(state.map.as_deref(), Some("city"));
        assert_eq!(
            state.control("measure"),
            Some(&ControlValue::Json(json!({"active": false})))
        );
    }

    #[test]
    fn test_from_record_textual_fields() {
        let state = MapState::from_record(&record(json!({
            "center": "10,20",
            "zoom": "6",
            "layers": "roads,v=1,o=40",
            "legend": "expanded,visibleLayersViewActive",
            "controls.filter": "{\"q\":1}",
            "controls.broken": "{nope"
        })));
        assert_eq!(state.center, Some([10.0, 20.0]));
        assert_eq!(state.zoom, Some(6.0));
        assert_eq!(state.layer("roads").unwrap().opacity, Some(0.4));
        assert_eq!(state.legend.len(), 2);
        assert_eq!(
            state.control("filter"),
            Some(&ControlValue::Json(json!({"q": 1})))
        );
        assert_eq!(
            state.control("broken"),
            Some(&ControlValue::Raw("{nope".to_string()))
        );
    }

    #[test]
    fn test_from_record_tolerates_garbage() {
        let state = MapState::from_record(&record(json!({
            "center": {"x": 1},
            "zoom": [1],
            "layers": 7,
            "pin": [1, "a"],
            "feature": null,
            "mapStateId": "abc",
            "nested": {"a": 1}
        })));
        assert_eq!(state.center, None);
        assert_eq!(state.zoom, None);
        assert!(state.layers.is_empty());
        assert_eq!(state.pin, None);
        assert_eq!(state.feature, None);
        assert_eq!(state.extra("mapStateId"), Some("abc"));
        assert_eq!(state.extra("nested"), None);
    }

    #[test]
    fn test_to_record_then_from_record() {
        let mut state = MapState {
            center: Some([1.0, 2.0]),
            zoom: Some(3.0),
            feature: Some("roads.9".to_string()),
            ..Default::default()
        };
        state.set_layer(
            "roads",
            LayerState {
                visible: Some(true),
                active_themes: Some(vec!["a".to_string()]),
                ..Default::default()
            },
        );
        state.set_control("measure", ControlValue::Json(json!([1, 2])));
        assert_eq!(MapState::from_record(&state.to_record()), state);
    }
}
