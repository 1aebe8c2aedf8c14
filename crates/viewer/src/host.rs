//! Application shell: owns the live viewer across restarts and guards every
//! asynchronous completion with the generation of the run that issued it.

use std::cell::RefCell;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tracing::{error, info};

use crate::bootstrap::{Bootstrap, BootstrapOutcome};
use crate::capabilities::CapabilityFetcher;
use crate::config::ViewerConfig;
use crate::error::ConfigError;
use crate::params::UrlParams;
use crate::reconcile::{self, StateFetcher};
use crate::reload::ReloadTrigger;
use crate::session::{Generations, SessionToken};
use crate::viewer::Viewer;

pub struct ViewerHost<C, S> {
    config: Arc<ViewerConfig>,
    capabilities: C,
    /// Present only when a save endpoint is configured.
    states: Option<S>,
    generations: Generations,
    viewer: RefCell<Option<Viewer>>,
    trigger: RefCell<ReloadTrigger>,
    fragment: RefCell<Option<String>>,
}

impl<C: CapabilityFetcher, S: StateFetcher> ViewerHost<C, S> {
    pub fn new(config: Arc<ViewerConfig>, capabilities: C, states: Option<S>) -> Self {
        ViewerHost {
            config,
            capabilities,
            states,
            generations: Generations::new(),
            viewer: RefCell::new(None),
            trigger: RefCell::new(ReloadTrigger::default()),
            fragment: RefCell::new(None),
        }
    }

    /// Bootstrap from a launch URL.
    ///
    /// Returns the generation of the installed viewer, or `None` when a newer
    /// run took over before this one finished.
    pub async fn start(&self, url: &str) -> Result<Option<u64>, ConfigError> {
        self.start_with(UrlParams::from_url(url)).await
    }

    pub async fn start_with(&self, params: UrlParams) -> Result<Option<u64>, ConfigError> {
        let token = self.generations.begin();
        let map_state_id = params.map_state_id.clone();

        let mut bootstrap = Bootstrap::new(Arc::clone(&self.config), params, token.clone());
        let viewer = match bootstrap.run(&self.capabilities).await? {
            BootstrapOutcome::Ready(viewer) => viewer,
            BootstrapOutcome::Superseded { .. } => return Ok(None),
        };
        if !token.is_current() {
            return Ok(None);
        }

        self.trigger
            .borrow_mut()
            .set_active_map(viewer.map_name().map(str::to_string));
        *self.viewer.borrow_mut() = Some(viewer);
        *self.fragment.borrow_mut() = None;

        if let Some(id) = map_state_id {
            self.reconcile(&token, &id).await;
        }
        Ok(Some(token.generation()))
    }

    async fn reconcile(&self, token: &SessionToken, id: &str) {
        let Some(states) = &self.states else {
            info!(map_state_id = %id, "no save endpoint configured, ignoring mapStateId");
            return;
        };
        if let Some(fragment) = reconcile::reconcile(states, id, token, &self.viewer).await {
            *self.fragment.borrow_mut() = Some(fragment);
        }
    }

    /// React to a fragment change. Restarts only when the map changed.
    pub async fn handle_fragment_change(&self, url: &str) -> Result<Option<u64>, ConfigError> {
        let params = self.trigger.borrow().check(url);
        match params {
            Some(params) => self.start_with(params).await,
            None => Ok(None),
        }
    }

    /// Consume fragment-change notifications until the stream ends.
    pub async fn watch_fragments<St>(&self, mut changes: St)
    where
        St: Stream<Item = String> + Unpin,
    {
        while let Some(url) = changes.next().await {
            if let Err(err) = self.handle_fragment_change(&url).await {
                error!(url = %url, error = %err, "restart failed");
            }
        }
    }

    pub fn with_viewer<R>(&self, f: impl FnOnce(&Viewer) -> R) -> Option<R> {
        self.viewer.borrow().as_ref().map(f)
    }

    pub fn with_viewer_mut<R>(&self, f: impl FnOnce(&mut Viewer) -> R) -> Option<R> {
        self.viewer.borrow_mut().as_mut().map(f)
    }

    /// Fragment of the last applied persisted state, for the address bar.
    pub fn fragment(&self) -> Option<String> {
        self.fragment.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generations.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_config, FakeCapabilities, FakeStates, Gated};
    use crate::viewer::ViewerEvent;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn host<C: CapabilityFetcher, S: StateFetcher>(caps: C, states: Option<S>) -> ViewerHost<C, S> {
        ViewerHost::new(Arc::new(sample_config()), caps, states)
    }

    #[tokio::test]
    async fn test_start_installs_ready_viewer() {
        let host = host(FakeCapabilities::new(), None::<FakeStates>);
        let generation = host.start("https://maps.example.com/#zoom=4").await.unwrap();
        assert_eq!(generation, Some(1));
        assert_eq!(host.with_viewer(|v| v.is_ready()), Some(true));
        assert_eq!(host.with_viewer(|v| v.view().zoom), Some(Some(4.0)));
    }

    #[tokio::test]
    async fn test_stale_bootstrap_does_not_replace_newer_viewer() {
        let (release, gate) = oneshot::channel();
        let host = host(Gated::new(gate, FakeCapabilities::new()), None::<FakeStates>);

        let first = host.start("https://maps.example.com/#map=city");
        let second = async {
            let generation = host.start("https://maps.example.com/#map=county").await;
            let _ = release.send(());
            generation
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap(), None);
        assert_eq!(second.unwrap(), Some(2));
        assert_eq!(host.with_viewer(|v| v.generation()), Some(2));
        assert_eq!(
            host.with_viewer(|v| v.map_name().map(str::to_string)),
            Some(Some("county".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fragment_change_restarts_only_on_new_map() {
        let host = host(FakeCapabilities::new(), None::<FakeStates>);
        host.start("https://maps.example.com/#map=city").await.unwrap();

        let same = host
            .handle_fragment_change("https://maps.example.com/#map=city&zoom=3")
            .await
            .unwrap();
        assert_eq!(same, None);
        assert_eq!(host.generation(), 1);

        let other = host
            .handle_fragment_change("https://maps.example.com/#map=county&zoom=3")
            .await
            .unwrap();
        assert_eq!(other, Some(2));
        assert_eq!(host.with_viewer(|v| v.view().zoom), Some(Some(3.0)));
    }

    #[tokio::test]
    async fn test_watch_fragments_consumes_stream() {
        let host = host(FakeCapabilities::new(), None::<FakeStates>);
        host.start("https://maps.example.com/#map=city").await.unwrap();

        let changes = futures_util::stream::iter(vec![
            "https://maps.example.com/#map=city&zoom=1".to_string(),
            "https://maps.example.com/#map=county".to_string(),
            "https://maps.example.com/#map=city".to_string(),
        ]);
        host.watch_fragments(changes).await;
        assert_eq!(host.generation(), 3);
    }

    #[tokio::test]
    async fn test_map_state_id_is_reconciled_after_ready() {
        let states = FakeStates::new().with("abc", json!({"zoom": 6, "layers": {"rivers": {"visible": true}}}));
        let host = host(FakeCapabilities::new(), Some(states));
        host.start("https://maps.example.com/?mapStateId=abc").await.unwrap();

        assert_eq!(host.fragment().as_deref(), Some("zoom=6&layers=rivers%2Cv%3D1"));
        let events = host.with_viewer(|v| v.events().to_vec()).unwrap();
        let ready = events.iter().position(|e| *e == ViewerEvent::Ready).unwrap();
        let change = events
            .iter()
            .position(|e| matches!(e, ViewerEvent::StateChange(_)))
            .unwrap();
        assert!(ready < change);
        assert_eq!(host.with_viewer(|v| v.view().zoom), Some(Some(6.0)));
    }

    #[tokio::test]
    async fn test_map_state_id_ignored_without_endpoint() {
        let host = host(FakeCapabilities::new(), None::<FakeStates>);
        host.start("https://maps.example.com/?mapStateId=abc").await.unwrap();
        assert_eq!(host.fragment(), None);
    }

    #[tokio::test]
    async fn test_stale_reconciliation_is_discarded() {
        let (release, gate) = oneshot::channel();
        let states = Gated::new(gate, FakeStates::new().with("abc", json!({"zoom": 9})));
        let host = host(FakeCapabilities::new(), Some(states));

        let first = host.start("https://maps.example.com/?mapStateId=abc#map=city");
        let second = async {
            let generation = host.start("https://maps.example.com/#map=county").await;
            let _ = release.send(());
            generation
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap(), Some(1));
        assert_eq!(second.unwrap(), Some(2));
        assert_eq!(host.fragment(), None);
        let changed = host
            .with_viewer(|v| v.events().iter().any(|e| matches!(e, ViewerEvent::StateChange(_))))
            .unwrap();
        assert!(!changed);
    }
}
