//! RemoteStateReconciler: applies a server-persisted state to a ready viewer
//! through the same path as URL fragments.

use std::cell::RefCell;

use mapstate_shared::codec;
use mapstate_shared::models::MapState;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::FetchError;
use crate::session::SessionToken;
use crate::viewer::Viewer;

/// Looks up a persisted state record by id.
#[allow(async_fn_in_trait)]
pub trait StateFetcher {
    async fn fetch_state(&self, id: &str) -> Result<Option<Map<String, Value>>, FetchError>;
}

/// Fetch and normalize the state stored under `id`.
///
/// The record is decoded once into a [`MapState`], then encoded and decoded
/// again so it has exactly the shape of a state read from a fragment.
/// Returns the state with its fragment text, or `None` (logged) when there is
/// nothing usable.
pub async fn fetch_normalized<F: StateFetcher>(fetcher: &F, id: &str) -> Option<(MapState, String)> {
    let record = match fetcher.fetch_state(id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(map_state_id = %id, "no persisted state for id");
            return None;
        }
        Err(err) => {
            warn!(map_state_id = %id, error = %err, "failed to fetch persisted state");
            return None;
        }
    };

    let fragment = codec::encode(&MapState::from_record(&record));
    let state = codec::decode(&fragment);
    if state.is_empty() {
        warn!(map_state_id = %id, "persisted state holds nothing to apply");
        return None;
    }
    Some((state, fragment))
}

fn ready_viewer_of(slot: &RefCell<Option<Viewer>>) -> bool {
    slot.borrow().as_ref().is_some_and(Viewer::is_ready)
}

/// Reconcile the viewer in `slot` with the state stored under `id`.
///
/// `token` belongs to the bootstrap run that installed the viewer; when a
/// newer run has begun by the time the fetch completes, the result is
/// discarded. The slot is only borrowed outside the fetch. Never fails: a
/// bad or expired id only logs. Returns the applied fragment.
pub async fn reconcile<F: StateFetcher>(
    fetcher: &F,
    id: &str,
    token: &SessionToken,
    slot: &RefCell<Option<Viewer>>,
) -> Option<String> {
    if !token.is_current() || !ready_viewer_of(slot) {
        warn!(map_state_id = %id, "viewer not ready, skipping reconciliation");
        return None;
    }
    let (state, fragment) = fetch_normalized(fetcher, id).await?;
    if !token.is_current() {
        info!(
            map_state_id = %id,
            generation = token.generation(),
            "viewer restarted while fetching persisted state, discarding"
        );
        return None;
    }

    let mut slot = slot.borrow_mut();
    let viewer = slot.as_mut().filter(|viewer| viewer.is_ready())?;
    viewer.apply_state(state);
    info!(map_state_id = %id, generation = token.generation(), "Applied persisted map state");
    Some(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Generations;
    use crate::testing::{ready_viewer, FakeStates, Gated};
    use crate::viewer::ViewerEvent;
    use mapstate_shared::models::ControlValue;
    use serde_json::json;
    use tokio::sync::oneshot;

    async fn slot() -> RefCell<Option<Viewer>> {
        let mut viewer = ready_viewer().await;
        viewer.drain_events();
        RefCell::new(Some(viewer))
    }

    fn events(slot: &RefCell<Option<Viewer>>) -> Vec<ViewerEvent> {
        slot.borrow_mut().as_mut().unwrap().drain_events()
    }

    #[tokio::test]
    async fn test_reconcile_applies_round_tripped_state() {
        let states = FakeStates::new().with(
            "abc",
            json!({
                "center": [100.4, 200.6],
                "zoom": 5,
                "layers": {"rivers": {"visible": true, "opacity": 0.333}},
                "controls": {"measure": {"active": true}}
            }),
        );
        let generations = Generations::new();
        let token = generations.begin();
        let slot = slot().await;

        let fragment = reconcile(&states, "abc", &token, &slot).await.unwrap();
        assert_eq!(
            fragment,
            "center=100,201&zoom=5&layers=rivers%2Cv%3D1%2Co%3D33&controls.measure=%7B%22active%22%3Atrue%7D"
        );

        let events = events(&slot);
        assert_eq!(events.len(), 1);
        let ViewerEvent::StateChange(applied) = &events[0] else {
            panic!("expected state change, got {:?}", events[0]);
        };
        // rounded exactly like a fragment-borne state
        assert_eq!(applied.center, Some([100.0, 201.0]));
        assert_eq!(applied.layer("rivers").unwrap().opacity, Some(0.33));

        let viewer = slot.borrow();
        let viewer = viewer.as_ref().unwrap();
        assert_eq!(viewer.view().center, Some([100.0, 201.0]));
        assert_eq!(
            viewer.control_state("measure"),
            Some(&ControlValue::Json(json!({"active": true})))
        );
    }

    #[tokio::test]
    async fn test_unknown_id_is_silent() {
        let token = Generations::new().begin();
        let slot = slot().await;

        assert_eq!(reconcile(&FakeStates::new(), "missing", &token, &slot).await, None);
        assert!(events(&slot).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_silent() {
        let states = FakeStates::new().failing("abc");
        let token = Generations::new().begin();
        let slot = slot().await;

        assert_eq!(reconcile(&states, "abc", &token, &slot).await, None);
        assert!(events(&slot).is_empty());
    }

    #[tokio::test]
    async fn test_skipped_without_viewer() {
        let states = FakeStates::new().with("abc", json!({"zoom": 3}));
        let token = Generations::new().begin();
        let slot = RefCell::new(None);

        assert_eq!(reconcile(&states, "abc", &token, &slot).await, None);
    }

    #[tokio::test]
    async fn test_restart_during_fetch_discards_result() {
        let (release, gate) = oneshot::channel();
        let states = Gated::new(gate, FakeStates::new().with("abc", json!({"zoom": 9})));
        let generations = Generations::new();
        let token = generations.begin();
        let slot = slot().await;

        let pending = reconcile(&states, "abc", &token, &slot);
        let restart = async {
            generations.begin();
            let _ = release.send(());
        };
        let (fragment, ()) = tokio::join!(pending, restart);

        assert_eq!(fragment, None);
        assert!(events(&slot).is_empty());
        assert_ne!(slot.borrow().as_ref().unwrap().view().zoom, Some(9.0));
    }

    #[tokio::test]
    async fn test_empty_record_applies_nothing() {
        let states = FakeStates::new().with("abc", json!({"center": "garbage"}));
        assert!(fetch_normalized(&states, "abc").await.is_none());
    }
}
