use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    AppState,
    error::{AnalyzeError, ApiError},
    recipe::Recipe,
};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub tiktok_url: String,
}

#[derive(Debug, Serialize)]
pub struct RecipeResponse {
    pub success: bool,
    #[serde(flatten)]
    pub recipe: Recipe,
    /// Always empty on success; kept for clients reading `data.error`.
    pub error: String,
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "TikTok to Recipe API is running",
    }))
}

pub async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<RecipeResponse>, ApiError> {
    let Json(request) = payload?;

    // Runs detached: a client disconnect must not skip the remote cleanup.
    let analyzer = state.analyzer.clone();
    let recipe = tokio::spawn(async move { analyzer.analyze(&request.tiktok_url).await })
        .await
        .map_err(|error| AnalyzeError::Upstream(format!("Analyse interrompue : {error}")))??;

    Ok(Json(RecipeResponse {
        success: true,
        recipe,
        error: String::new(),
    }))
}
