//! Client for the Gemini Files and `generateContent` REST endpoints.
//!
//! The pipeline only talks to [`MediaModel`]; [`GeminiClient`] is the
//! production implementation.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Erreur réseau vers Gemini : {0}")]
    Network(#[from] reqwest::Error),
    #[error("Erreur API Gemini {status} : {body}")]
    Api { status: u16, body: String },
    #[error("Réponse Gemini inattendue : {0}")]
    Protocol(String),
    #[error("Impossible de lire la vidéo téléchargée : {0}")]
    Io(#[from] std::io::Error),
}

/// Processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum FileState {
    #[default]
    Unspecified,
    Processing,
    Active,
    Failed,
}

impl From<String> for FileState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PROCESSING" => Self::Processing,
            "ACTIVE" => Self::Active,
            "FAILED" => Self::Failed,
            _ => Self::Unspecified,
        }
    }
}

/// Handle on a file stored by the model service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Resource name, e.g. `files/abc123`.
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub state: FileState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// The remote multimodal model, as seen by the analyze pipeline.
#[async_trait]
pub trait MediaModel: Send + Sync {
    async fn upload(&self, path: &Path, mime_type: &str) -> Result<RemoteFile, GeminiError>;

    async fn file_state(&self, name: &str) -> Result<FileState, GeminiError>;

    async fn generate(
        &self,
        file: &RemoteFile,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GeminiError>;

    async fn delete(&self, name: &str) -> Result<(), GeminiError>;
}

pub struct GeminiClient {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, GeminiError> {
        let http = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(API_KEY_HEADER, &self.api_key)
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/v1beta/{}", self.api_base, name.trim_start_matches('/'))
    }
}

async fn ensure_success(response: Response) -> Result<Response, GeminiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(GeminiError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl MediaModel for GeminiClient {
    async fn upload(&self, path: &Path, mime_type: &str) -> Result<RemoteFile, GeminiError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let display_name = format!("tiktok-{}", Uuid::new_v4().simple());

        debug!(size, mime_type, %display_name, "Ouverture d'une session d'upload Gemini");

        let start = self
            .authorized(
                self.http
                    .post(format!("{}/upload/v1beta/files", self.api_base)),
            )
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&StartUploadRequest {
                file: StartUploadFile {
                    display_name: &display_name,
                },
            })
            .send()
            .await?;
        let start = ensure_success(start).await?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| GeminiError::Protocol("URL de session d'upload absente".to_string()))?;

        let response = self
            .authorized(self.http.post(upload_url))
            .header(reqwest::header::CONTENT_LENGTH, size)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let mut uploaded: UploadResponse = ensure_success(response).await?.json().await?;
        if uploaded.file.mime_type.is_empty() {
            uploaded.file.mime_type = mime_type.to_string();
        }

        debug!(name = %uploaded.file.name, state = ?uploaded.file.state, "Fichier envoyé à Gemini");
        Ok(uploaded.file)
    }

    async fn file_state(&self, name: &str) -> Result<FileState, GeminiError> {
        let response = self
            .authorized(self.http.get(self.resource_url(name)))
            .send()
            .await?;
        let file: RemoteFile = ensure_success(response).await?.json().await?;

        Ok(file.state)
    }

    async fn generate(
        &self,
        file: &RemoteFile,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GeminiError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::FileData {
                        file_data: FileData {
                            mime_type: &file.mime_type,
                            file_uri: &file.uri,
                        },
                    },
                    Part::Text { text: prompt },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        };

        debug!(model = %self.model, file = %file.name, "Requête generateContent");

        let response = self
            .authorized(self.http.post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.api_base, self.model
            )))
            .json(&request)
            .send()
            .await?;
        let response: GenerateContentResponse = ensure_success(response).await?.json().await?;

        response.into_text()
    }

    async fn delete(&self, name: &str) -> Result<(), GeminiError> {
        let response = self
            .authorized(self.http.delete(self.resource_url(name)))
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StartUploadRequest<'a> {
    file: StartUploadFile<'a>,
}

#[derive(Debug, Serialize)]
struct StartUploadFile<'a> {
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    #[serde(rename_all = "camelCase")]
    FileData { file_data: FileData<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, GeminiError> {
        let block_reason = self
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason);
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(GeminiError::Protocol(match block_reason {
                Some(reason) => format!("requête bloquée ({reason})"),
                None => "aucun candidat renvoyé".to_string(),
            }));
        };

        let text: String = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.text)
            .collect();

        if text.is_empty() {
            let reason = candidate
                .finish_reason
                .unwrap_or_else(|| "inconnue".to_string());
            return Err(GeminiError::Protocol(format!(
                "réponse sans texte (raison de fin : {reason})"
            )));
        }

        Ok(text)
    }
}
