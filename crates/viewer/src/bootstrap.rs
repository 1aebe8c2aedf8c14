//! ViewerBootstrap: the ordered pipeline that turns static configuration and
//! URL parameters into a ready viewer.
//!
//! Transitions are strictly sequential. The only suspension point is the
//! capability resolution; after it the run re-checks its session token and
//! stops if a newer run has started meanwhile.

use std::sync::Arc;

use mapstate_shared::merge;
use tracing::{info, warn};

use crate::capabilities::{self, CapabilityFetcher};
use crate::config::ViewerConfig;
use crate::error::ConfigError;
use crate::params::UrlParams;
use crate::session::SessionToken;
use crate::viewer::Viewer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    Created,
    ProjectionReady,
    CapabilitiesResolved,
    LayersMerged,
    LayersInstantiated,
    SubsystemsAttached,
    Ready,
    Failed,
}

#[derive(Debug)]
pub enum BootstrapOutcome {
    Ready(Viewer),
    /// A newer run began while this one was suspended.
    Superseded {
        generation: u64,
        phase: BootstrapPhase,
    },
}

pub struct Bootstrap {
    config: Arc<ViewerConfig>,
    params: UrlParams,
    token: SessionToken,
    phase: BootstrapPhase,
}

impl Bootstrap {
    pub fn new(config: Arc<ViewerConfig>, params: UrlParams, token: SessionToken) -> Self {
        Bootstrap {
            config,
            params,
            token,
            phase: BootstrapPhase::Created,
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.token.generation()
    }

    fn advance(&mut self, phase: BootstrapPhase) {
        info!(generation = self.token.generation(), from = ?self.phase, to = ?phase, "Bootstrap transition");
        self.phase = phase;
    }

    /// Run the pipeline to `Ready`.
    ///
    /// Only configuration errors fail the run, and they surface before the
    /// first suspension point.
    pub async fn run<F: CapabilityFetcher>(
        &mut self,
        fetcher: &F,
    ) -> Result<BootstrapOutcome, ConfigError> {
        let config = Arc::clone(&self.config);
        let params = self.params.clone();

        let projection = match config.projection() {
            Ok(projection) => projection,
            Err(err) => {
                self.advance(BootstrapPhase::Failed);
                return Err(err);
            }
        };
        self.advance(BootstrapPhase::ProjectionReady);

        let caps = capabilities::resolve(fetcher, &config.source).await;
        if !self.token.is_current() {
            info!(generation = self.token.generation(), "Bootstrap superseded, discarding");
            return Ok(BootstrapOutcome::Superseded {
                generation: self.token.generation(),
                phase: self.phase,
            });
        }
        self.advance(BootstrapPhase::CapabilitiesResolved);

        let state = &params.state;
        let saved = (!state.layers.is_empty()).then_some(state.layers.as_slice());
        let descriptors = merge::merge(&config.layers, &config.source, &caps, saved);
        self.advance(BootstrapPhase::LayersMerged);

        let map_name = state.map.clone().or_else(|| config.map.clone());
        let mut viewer = Viewer::new(self.token.generation(), &config, projection, map_name);
        for descriptor in descriptors {
            if let Err(err) = viewer.add_layer(descriptor) {
                warn!(error = %err, "skipping layer");
            }
        }
        self.advance(BootstrapPhase::LayersInstantiated);

        viewer.set_view(state.center, state.zoom);
        if !state.legend.is_empty() {
            viewer.set_legend(state.legend.clone());
        }
        viewer.attach_subsystems(state.pin, params.selection.clone());
        for def in &config.controls {
            viewer.add_control(def, state.control(&def.name).cloned());
        }
        self.advance(BootstrapPhase::SubsystemsAttached);

        let explicit_view = params.has_explicit_view();
        if !explicit_view && params.map_state_id.is_none() {
            if let Some(extent) = config.start_extent {
                viewer.fit_extent(extent);
            }
        }
        if let Some((layer, feature_id)) = state.feature_ref() {
            viewer.restore_feature(layer, feature_id, !explicit_view);
        }
        viewer.mark_ready();
        self.advance(BootstrapPhase::Ready);

        Ok(BootstrapOutcome::Ready(viewer))
    }
}
