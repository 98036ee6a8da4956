use std::{sync::Arc, time::Duration};

use tempfile::TempDir;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::{
    downloader::{VideoFetcher, mime_type_for_path},
    error::AnalyzeError,
    gemini::{FileState, GeminiError, GenerationParams, MediaModel, RemoteFile},
    recipe::{Recipe, map_recipe, parse_recipe_json},
    tiktok::is_valid_tiktok_url,
};

pub const RECIPE_PROMPT: &str = r#"Tu es un chef cuisinier professionnel expert en analyse de recettes.

MISSION : Analyse cette vidéo de cuisine en utilisant la vision et l'audio.

INSTRUCTIONS :
1. Identifie TOUS les ingrédients visibles ou mentionnés.
2. Pour chaque ingrédient, estime la quantité EN NOMBRE (pas de texte comme "une pincée").
3. Utilise toujours des grammes (g) ou millilitres (ml) comme unité.
4. Si une quantité n'est pas claire, estime-la raisonnablement pour 2 personnes.
5. Liste les étapes de préparation dans l'ordre chronologique.

RÉPONDS UNIQUEMENT EN JSON VALIDE avec ce format exact (pas de markdown, pas de ```):

{
  "recipe_name": "Nom du plat",
  "description": "Description courte en 1-2 phrases",
  "servings": 2,
  "ingredients": [
    {"name": "Ingrédient 1", "quantity": 200, "unit": "g"},
    {"name": "Ingrédient 2", "quantity": 100, "unit": "ml"}
  ],
  "steps": [
    {"number": 1, "title": "Préparation", "description": "Description détaillée de l'étape"},
    {"number": 2, "title": "Cuisson", "description": "Description détaillée"}
  ],
  "tips": ["Conseil 1", "Conseil 2"]
}

IMPORTANT : Réponds UNIQUEMENT avec le JSON, sans aucun texte avant ou après."#;

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerOptions {
    pub poll_interval: Duration,
    pub active_timeout: Duration,
    pub generation: GenerationParams,
}

/// Runs one TikTok link through download, upload, inference and parsing.
pub struct RecipeAnalyzer {
    fetcher: Arc<dyn VideoFetcher>,
    model: Arc<dyn MediaModel>,
    options: AnalyzerOptions,
}

impl RecipeAnalyzer {
    pub fn new(
        fetcher: Arc<dyn VideoFetcher>,
        model: Arc<dyn MediaModel>,
        options: AnalyzerOptions,
    ) -> Self {
        Self {
            fetcher,
            model,
            options,
        }
    }

    pub async fn analyze(&self, tiktok_url: &str) -> Result<Recipe, AnalyzeError> {
        let span = info_span!("analyze", request_id = %Uuid::new_v4());
        self.analyze_inner(tiktok_url).instrument(span).await
    }

    async fn analyze_inner(&self, tiktok_url: &str) -> Result<Recipe, AnalyzeError> {
        if !is_valid_tiktok_url(tiktok_url) {
            warn!("URL refusée : {:?}", tiktok_url);
            return Err(AnalyzeError::InvalidUrl);
        }
        let url = tiktok_url.trim();

        let job_dir = TempDir::new().map_err(|error| {
            AnalyzeError::Upstream(format!(
                "Impossible de préparer le dossier temporaire : {error}"
            ))
        })?;

        info!("Téléchargement de {:?}", url);
        let video_path = self
            .fetcher
            .fetch(url, job_dir.path())
            .await
            .ok_or(AnalyzeError::FetchFailed)?;

        let mime_type = mime_type_for_path(&video_path);
        info!("Envoi de {:?} ({mime_type}) vers Gemini", video_path);
        let file = self
            .model
            .upload(&video_path, mime_type)
            .await
            .map_err(upstream)?;

        let result = self.analyze_uploaded(&file).await;
        self.release(&file).await;

        result
    }

    async fn analyze_uploaded(&self, file: &RemoteFile) -> Result<Recipe, AnalyzeError> {
        let ready = wait_for_file_active(
            self.model.as_ref(),
            &file.name,
            self.options.poll_interval,
            self.options.active_timeout,
        )
        .await
        .map_err(upstream)?;
        if !ready {
            return Err(AnalyzeError::NotReady);
        }

        info!("Analyse de {} par le modèle", file.name);
        let text = self
            .model
            .generate(file, RECIPE_PROMPT, &self.options.generation)
            .await
            .map_err(upstream)?;

        let Some(data) = parse_recipe_json(&text) else {
            warn!(
                "Réponse du modèle illisible ({} octets) pour {}",
                text.len(),
                file.name
            );
            return Err(AnalyzeError::Unparseable);
        };

        let recipe = map_recipe(&data);
        info!(
            "Recette {:?} extraite : {} ingrédient(s), {} étape(s)",
            recipe.recipe_name,
            recipe.ingredients.len(),
            recipe.steps.len()
        );
        Ok(recipe)
    }

    async fn release(&self, file: &RemoteFile) {
        if let Err(error) = self.model.delete(&file.name).await {
            warn!(file = %file.name, "Suppression du fichier Gemini impossible : {error}");
        }
    }
}

fn upstream(error: GeminiError) -> AnalyzeError {
    AnalyzeError::Upstream(error.to_string())
}

/// Polls the file until it becomes usable.
///
/// `Ok(false)` covers both an explicit `FAILED` state and running out of time.
/// `max_wait` is a hard deadline, including a state query that hangs.
pub async fn wait_for_file_active(
    model: &dyn MediaModel,
    name: &str,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<bool, GeminiError> {
    let deadline = Instant::now() + max_wait;

    loop {
        let Ok(state) = timeout_at(deadline, model.file_state(name)).await else {
            break;
        };
        match state? {
            FileState::Active => return Ok(true),
            FileState::Failed => {
                warn!("Gemini signale l'échec du traitement de {name}");
                return Ok(false);
            }
            FileState::Processing | FileState::Unspecified => {}
        }

        if timeout_at(deadline, sleep(poll_interval)).await.is_err() {
            break;
        }
    }

    warn!(
        "{name} n'est pas prêt après {} s",
        max_wait.as_secs()
    );
    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;

    struct HangingModel {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl MediaModel for HangingModel {
        async fn upload(&self, _path: &Path, _mime_type: &str) -> Result<RemoteFile, GeminiError> {
            unreachable!("not used by the readiness wait")
        }

        async fn file_state(&self, _name: &str) -> Result<FileState, GeminiError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<Result<FileState, GeminiError>>().await
        }

        async fn generate(
            &self,
            _file: &RemoteFile,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, GeminiError> {
            unreachable!("not used by the readiness wait")
        }

        async fn delete(&self, _name: &str) -> Result<(), GeminiError> {
            unreachable!("not used by the readiness wait")
        }
    }

    #[tokio::test]
    async fn hanging_state_query_still_respects_the_deadline() {
        let model = HangingModel {
            polls: AtomicUsize::new(0),
        };
        let started = Instant::now();

        let ready = wait_for_file_active(
            &model,
            "files/stuck",
            Duration::from_millis(5),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert!(!ready);
        assert_eq!(model.polls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
