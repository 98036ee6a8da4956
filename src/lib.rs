pub mod config;
pub mod downloader;
pub mod error;
pub mod gemini;
pub mod handlers;
pub mod pipeline;
pub mod recipe;
pub mod tiktok;

use std::{collections::HashSet, sync::Arc};

use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigError, Settings, normalize_origin},
    downloader::YtDlpFetcher,
    gemini::{GeminiClient, GeminiError},
    pipeline::RecipeAnalyzer,
};

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<RecipeAnalyzer>,
}

impl AppState {
    pub fn new(analyzer: RecipeAnalyzer) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Impossible de créer le client Gemini : {0}")]
    Client(#[from] GeminiError),
    #[error("Impossible d'écouter sur {addr} : {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("Erreur du serveur HTTP : {0}")]
    Serve(std::io::Error),
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/api/analyze", post(handlers::analyze))
        .with_state(state)
}

pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS n'est pas configuré : toutes les origines sont acceptées.");
        return cors.allow_origin(Any);
    }

    let allowed: Arc<HashSet<String>> = Arc::new(allowed_origins.iter().cloned().collect());
    info!(
        "Liste CORS chargée avec {} origine(s) : {:?}",
        allowed.len(),
        allowed_origins
    );

    cors.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let accepted = normalized
                .as_ref()
                .is_some_and(|value| allowed.contains(value));
            debug!(
                "Contrôle CORS brut={:?} normalisé={:?} accepté={}",
                origin, normalized, accepted
            );
            accepted
        },
    ))
}

pub async fn run(settings: Settings) -> Result<(), ServerError> {
    let model = GeminiClient::new(
        &settings.gemini_api_base,
        settings.gemini_api_key.clone(),
        settings.gemini_model.clone(),
        settings.gemini_http_timeout,
    )?;
    let fetcher = YtDlpFetcher::new(settings.yt_dlp_bin.clone(), settings.download_timeout);
    let analyzer = RecipeAnalyzer::new(
        Arc::new(fetcher),
        Arc::new(model),
        settings.analyzer_options(),
    );

    info!(
        "Modèle {} via {}, yt-dlp : {}",
        settings.gemini_model, settings.gemini_api_base, settings.yt_dlp_bin
    );

    let app = build_router(AppState::new(analyzer))
        .layer(build_cors_layer(&settings.allowed_origins))
        .layer(TraceLayer::new_for_http());

    let addr = settings.bind_addr;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!("Backend prêt sur http://{addr}");

    axum::serve(listener, app).await.map_err(ServerError::Serve)
}
