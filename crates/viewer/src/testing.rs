//! In-memory collaborators for tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use mapstate_shared::models::{LayerSeed, LayerType, SourceCapabilities, SourceConfig};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::bootstrap::{Bootstrap, BootstrapOutcome};
use crate::capabilities::CapabilityFetcher;
use crate::config::{ControlDef, ViewerConfig};
use crate::error::FetchError;
use crate::params::UrlParams;
use crate::reconcile::StateFetcher;
use crate::session::Generations;
use crate::viewer::Viewer;

/// Two sources: `secured` declares a capabilities endpoint, `tiles` does not.
pub fn sample_config() -> ViewerConfig {
    let mut config = ViewerConfig::new("#map");
    config.map = Some("city".to_string());
    config.start_extent = Some([0.0, 0.0, 1000.0, 1000.0]);
    config.source.insert(
        "secured".to_string(),
        SourceConfig {
            url: Some("https://maps.example.com/wms".to_string()),
            capabilities_url: Some("https://maps.example.com/caps".to_string()),
        },
    );
    config.source.insert(
        "tiles".to_string(),
        SourceConfig {
            url: Some("https://tiles.example.com".to_string()),
            capabilities_url: None,
        },
    );
    let layer = |name: &str, source: &str, layer_type: LayerType, visible: bool| LayerSeed {
        source: Some(source.to_string()),
        layer_type,
        visible,
        ..LayerSeed::new(name)
    };
    config.layers = vec![
        layer("topp:roads", "secured", LayerType::Wms, true),
        layer("parcels", "tiles", LayerType::Wfs, true),
        layer("rivers", "secured", LayerType::Wms, true),
        layer("orthophoto", "tiles", LayerType::Xyz, false),
    ];
    config.controls = vec![ControlDef::new("measure"), ControlDef::new("sharemap")];
    config
}

pub async fn ready_viewer() -> Viewer {
    let generations = Generations::new();
    let mut bootstrap = Bootstrap::new(
        Arc::new(sample_config()),
        UrlParams::default(),
        generations.begin(),
    );
    match bootstrap.run(&FakeCapabilities::new()).await {
        Ok(BootstrapOutcome::Ready(viewer)) => viewer,
        other => panic!("bootstrap did not reach ready: {other:?}"),
    }
}

/// Answers from a fixed table; unknown sources fail with 404.
#[derive(Default)]
pub struct FakeCapabilities {
    layers: HashMap<String, Vec<String>>,
    failing: Vec<String>,
    calls: RefCell<Vec<String>>,
}

impl FakeCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: &str, layers: &[&str]) -> Self {
        self.layers.insert(
            source.to_string(),
            layers.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    pub fn failing(mut self, source: &str) -> Self {
        self.failing.push(source.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CapabilityFetcher for FakeCapabilities {
    async fn fetch_capabilities(
        &self,
        source: &str,
        _url: &str,
    ) -> Result<SourceCapabilities, FetchError> {
        self.calls.borrow_mut().push(source.to_string());
        if self.failing.iter().any(|s| s == source) {
            return Err(FetchError::Status(503));
        }
        match self.layers.get(source) {
            Some(layers) => Ok(SourceCapabilities {
                name: source.to_string(),
                capabilities: layers.clone(),
            }),
            None => Err(FetchError::Status(404)),
        }
    }
}

#[derive(Default)]
pub struct FakeStates {
    records: HashMap<String, Map<String, Value>>,
    failing: Vec<String>,
}

impl FakeStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, record: Value) -> Self {
        if let Value::Object(record) = record {
            self.records.insert(id.to_string(), record);
        }
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.push(id.to_string());
        self
    }
}

impl StateFetcher for FakeStates {
    async fn fetch_state(&self, id: &str) -> Result<Option<Map<String, Value>>, FetchError> {
        if self.failing.iter().any(|f| f == id) {
            return Err(FetchError::GraphQl("Invalid map state id".to_string()));
        }
        Ok(self.records.get(id).cloned())
    }
}

/// Holds the first call until the gate is released; later calls pass.
pub struct Gated<T> {
    gate: RefCell<Option<oneshot::Receiver<()>>>,
    inner: T,
}

impl<T> Gated<T> {
    pub fn new(gate: oneshot::Receiver<()>, inner: T) -> Self {
        Gated {
            gate: RefCell::new(Some(gate)),
            inner,
        }
    }

    async fn wait(&self) {
        let gate = self.gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }
}

impl<T: CapabilityFetcher> CapabilityFetcher for Gated<T> {
    async fn fetch_capabilities(
        &self,
        source: &str,
        url: &str,
    ) -> Result<SourceCapabilities, FetchError> {
        self.wait().await;
        self.inner.fetch_capabilities(source, url).await
    }
}

impl<T: StateFetcher> StateFetcher for Gated<T> {
    async fn fetch_state(&self, id: &str) -> Result<Option<Map<String, Value>>, FetchError> {
        self.wait().await;
        self.inner.fetch_state(id).await
    }
}
