use mapstate_shared::models::SourceCapabilities;
use std::collections::HashMap;
use std::path::Path;

/// Capability lists served to viewers, keyed by source name.
#[derive(Debug, Default)]
pub struct Assets {
    pub capabilities: HashMap<String, Vec<String>>,
}

impl Assets {
    pub fn load(assets_dir: &Path) -> Result<Self, String> {
        let capabilities_path = assets_dir.join("capabilities.json");

        let capabilities_data = std::fs::read_to_string(&capabilities_path)
            .map_err(|e| format!("Failed to read {}: {}", capabilities_path.display(), e))?;

        let capabilities: HashMap<String, Vec<String>> = serde_json::from_str(&capabilities_data)
            .map_err(|e| format!("Failed to parse capabilities.json: {}", e))?;

        tracing::info!(sources = capabilities.len(), "Loaded capability assets");

        Ok(Assets { capabilities })
    }

    pub fn capabilities_for(&self, source: &str) -> Option<SourceCapabilities> {
        self.capabilities
            .get(source)
            .map(|layers| SourceCapabilities {
                name: source.to_string(),
                capabilities: layers.clone(),
            })
    }
}
