use tracing::{debug, info};

use crate::params::UrlParams;

/// Decides whether a fragment change needs a full restart: only when the new
/// fragment names a different map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadTrigger {
    active_map: Option<String>,
}

impl ReloadTrigger {
    pub fn new(active_map: Option<String>) -> Self {
        ReloadTrigger { active_map }
    }

    pub fn active_map(&self) -> Option<&str> {
        self.active_map.as_deref()
    }

    pub fn set_active_map(&mut self, map: Option<String>) {
        self.active_map = map;
    }

    /// URL parameters for the restart, or `None` when the change is not ours
    /// to handle.
    pub fn check(&self, url: &str) -> Option<UrlParams> {
        let params = UrlParams::from_url(url);
        let map = params.state.map.as_deref()?;
        if self.active_map.as_deref() == Some(map) {
            debug!(map, "fragment changed within the active map");
            return None;
        }
        info!(from = ?self.active_map, to = map, "Map changed, restarting viewer");
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_on_different_map() {
        let trigger = ReloadTrigger::new(Some("city".to_string()));
        let params = trigger
            .check("https://maps.example.com/#map=county&zoom=2")
            .unwrap();
        assert_eq!(params.state.map.as_deref(), Some("county"));
        assert_eq!(params.state.zoom, Some(2.0));
    }

    #[test]
    fn test_ignores_same_map_and_mapless_fragments() {
        let trigger = ReloadTrigger::new(Some("city".to_string()));
        assert!(trigger.check("https://maps.example.com/#map=city&zoom=9").is_none());
        assert!(trigger.check("https://maps.example.com/#zoom=9").is_none());
        assert!(trigger.check("https://maps.example.com/").is_none());
    }

    #[test]
    fn test_fires_when_no_map_active() {
        let mut trigger = ReloadTrigger::default();
        assert!(trigger.check("https://maps.example.com/#map=city").is_some());
        trigger.set_active_map(Some("city".to_string()));
        assert_eq!(trigger.active_map(), Some("city"));
        assert!(trigger.check("https://maps.example.com/#map=city").is_none());
    }
}
