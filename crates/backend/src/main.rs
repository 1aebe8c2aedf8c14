mod assets;
mod graphql;
mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::http::{HeaderValue, StatusCode};
use axum::{
    extract::{self, State},
    response::Html,
    routing::get,
    Json, Router,
};
use mapstate_shared::models::SourceCapabilities;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing_subscriber::EnvFilter;

use assets::Assets;
use graphql::Schema;

async fn graphql_handler(State(schema): State<Schema>, req: GraphQLRequest) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn graphiql() -> Html<String> {
    Html(
        async_graphql::http::GraphiQLSource::build()
            .endpoint("/graphql")
            .finish(),
    )
}

async fn capabilities_handler(
    State(assets): State<Arc<Assets>>,
    extract::Path(source): extract::Path<String>,
) -> Result<Json<SourceCapabilities>, StatusCode> {
    assets
        .capabilities_for(&source)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Build a cache-controlled static file router.
///
/// Separated so tests can exercise the caching layer with arbitrary directories.
fn cached_static_router(dir: &Path, cache_header: &'static str) -> Router {
    let layer = SetResponseHeaderLayer::overriding(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static(cache_header),
    );
    Router::new()
        .fallback_service(ServeDir::new(dir))
        .layer(layer)
}

const CACHE_1DAY: &str = "public, max-age=86400, must-revalidate";

fn capabilities_router(assets: Arc<Assets>) -> Router {
    Router::new()
        .route("/capabilities/{source}", get(capabilities_handler))
        .with_state(assets)
}

/// Build the full application router.
fn build_app(schema: Schema, assets: Arc<Assets>, assets_dir: &Path) -> Router {
    Router::new()
        .route("/graphql", get(graphiql).post(graphql_handler))
        .route("/", get(serve_index))
        .with_state(schema)
        .merge(capabilities_router(assets))
        .nest("/static", cached_static_router(assets_dir, CACHE_1DAY))
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let assets_dir =
        PathBuf::from(std::env::var("ASSETS_DIR").unwrap_or_else(|_| "assets".to_string()));
    let loaded_assets = match Assets::load(&assets_dir) {
        Ok(assets) => Arc::new(assets),
        Err(e) => {
            tracing::warn!(error = %e, "No capability assets, every source is unrestricted");
            Arc::new(Assets::default())
        }
    };

    let db_path = PathBuf::from(
        std::env::var("DB_PATH").unwrap_or_else(|_| "data/mapstates.redb".to_string()),
    );
    if let Some(parent) = db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(error = %e, "Failed to create database directory");
            std::process::exit(1);
        }
    }
    let storage = match storage::Storage::open(&db_path) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open storage");
            std::process::exit(1);
        }
    };

    let schema = graphql::build_schema(storage);
    let app = build_app(schema, loaded_assets, &assets_dir);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Server running at http://localhost:{}", port);
    tracing::info!("GraphiQL playground at http://localhost:{}/graphql", port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server error");
    }
}

async fn serve_index() -> Html<String> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>Map State Service</title></head>
<body>
<h1>Map State Service</h1>
<p>Persisted viewer states. Visit <a href="/graphql">GraphiQL</a> to explore the API.</p>
</body>
</html>"#
            .to_string(),
    )
}
