use std::collections::HashMap;

use futures_util::future::join_all;
use mapstate_shared::models::{CapabilityResult, SourceCapabilities, SourceConfig};
use tracing::{debug, warn};

use crate::error::FetchError;

/// Looks up which layers a source currently authorizes.
#[allow(async_fn_in_trait)]
pub trait CapabilityFetcher {
    async fn fetch_capabilities(
        &self,
        source: &str,
        url: &str,
    ) -> Result<SourceCapabilities, FetchError>;
}

/// Query every source that declares a capabilities endpoint, concurrently,
/// and settle once all of them have answered or failed.
///
/// Sources without an endpoint are left out of the result (unrestricted).
/// A failed source is logged and left out as well.
pub async fn resolve<F: CapabilityFetcher>(
    fetcher: &F,
    sources: &HashMap<String, SourceConfig>,
) -> CapabilityResult {
    let mut queried: Vec<(&str, &str)> = sources
        .iter()
        .filter_map(|(name, config)| {
            config
                .capabilities_url
                .as_deref()
                .map(|url| (name.as_str(), url))
        })
        .collect();
    queried.sort_unstable();

    let fetches = queried
        .iter()
        .map(|(name, url)| fetcher.fetch_capabilities(name, url));
    let settled = join_all(fetches).await;

    let mut result = CapabilityResult::new();
    for ((name, url), outcome) in queried.iter().zip(settled) {
        match outcome {
            Ok(caps) => {
                debug!(source = %name, layers = caps.capabilities.len(), "capabilities resolved");
                result.insert(name, caps.capabilities);
            }
            Err(err) => {
                warn!(source = %name, url = %url, error = %err, "capability fetch failed, treating source as unrestricted");
            }
        }
    }
    result
}
