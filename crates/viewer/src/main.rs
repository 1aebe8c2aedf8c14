use std::path::PathBuf;
use std::sync::Arc;

use mapstate_viewer::api::{build_share_url, GraphQlClient, HttpCapabilityFetcher};
use mapstate_viewer::config::ViewerConfig;
use mapstate_viewer::host::ViewerHost;
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path =
        PathBuf::from(std::env::var("VIEWER_CONFIG").unwrap_or_else(|_| "assets/viewer.json".to_string()));
    let raw_url = std::env::var("VIEWER_URL").unwrap_or_else(|_| "http://localhost:3000/".to_string());
    let url = match Url::parse(&raw_url) {
        Ok(url) => url,
        Err(err) => {
            tracing::error!(url = %raw_url, error = %err, "Invalid VIEWER_URL");
            std::process::exit(1);
        }
    };

    let config = match ViewerConfig::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            tracing::error!(error = %err, "Cannot start viewer");
            std::process::exit(1);
        }
    };
    let states = config
        .save_on_server_service_endpoint
        .as_deref()
        .map(GraphQlClient::new);

    let host = ViewerHost::new(Arc::clone(&config), HttpCapabilityFetcher::new(), states.clone());
    match host.start(url.as_str()).await {
        Ok(Some(_)) => {}
        Ok(None) => return,
        Err(err) => {
            tracing::error!(error = %err, "Bootstrap failed");
            std::process::exit(1);
        }
    }

    let record = host.with_viewer(|viewer| {
        for layer in viewer.layers() {
            let d = layer.descriptor();
            println!(
                "{:<32} visible={:<5} secure={:<5} opacity={:.2}",
                d.name, d.visible, d.secure, d.opacity
            );
        }
        println!("Permalink: {}", viewer.permalink(&url));
        viewer.current_state().to_record()
    });

    // persist the current state when a save endpoint is configured
    if let (Some(client), Some(record)) = (&states, record) {
        match client.save_map_state(&record).await {
            Ok(id) => println!("Share: {}", build_share_url(&url, &id)),
            Err(err) => tracing::warn!(error = %err, "Failed to save map state"),
        }
    }
}
