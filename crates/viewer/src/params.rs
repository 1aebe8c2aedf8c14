use mapstate_shared::codec;
use mapstate_shared::models::MapState;
use tracing::{debug, warn};
use url::Url;

use crate::viewer::SelectionGeometry;

/// Query parameter naming a server-persisted state.
pub const MAP_STATE_ID: &str = "mapStateId";
const SELECTION_KEY: &str = "selection";

/// Everything a bootstrap run restores from its launch URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UrlParams {
    pub state: MapState,
    /// Id of a server-persisted state to reconcile once ready.
    pub map_state_id: Option<String>,
    pub selection: Option<SelectionGeometry>,
}

impl UrlParams {
    /// Parse a launch URL. One that does not parse restores nothing.
    pub fn from_url(url: &str) -> Self {
        match Url::parse(url) {
            Ok(url) => Self::from_parsed(&url),
            Err(err) => {
                warn!(url, error = %err, "ignoring unparseable URL");
                Self::default()
            }
        }
    }

    /// Read the first `mapStateId` query parameter and the fragment state.
    pub fn from_parsed(url: &Url) -> Self {
        let map_state_id = url
            .query_pairs()
            .find_map(|(key, value)| (key == MAP_STATE_ID).then(|| value.into_owned()))
            .filter(|id| !id.is_empty());

        let mut params = Self::from_state(codec::parse_url(url).unwrap_or_default());
        params.map_state_id = map_state_id;
        params
    }

    pub fn from_state(state: MapState) -> Self {
        let selection = state.extra(SELECTION_KEY).and_then(|raw| {
            serde_json::from_str::<SelectionGeometry>(raw)
                .map_err(|err| debug!(error = %err, "ignoring malformed selection"))
                .ok()
        });
        UrlParams {
            state,
            map_state_id: None,
            selection,
        }
    }

    /// Center or zoom was given explicitly.
    pub fn has_explicit_view(&self) -> bool {
        self.state.center.is_some() || self.state.zoom.is_some()
    }
}
