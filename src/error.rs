use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Every way a single analyze request can stop before producing a recipe.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("URL TikTok invalide")]
    InvalidUrl,
    #[error("Impossible de télécharger la vidéo. Vérifiez le lien ou réessayez.")]
    FetchFailed,
    #[error("Le traitement de la vidéo a échoué côté Google")]
    NotReady,
    #[error("Impossible de parser la réponse de l'IA")]
    Unparseable,
    #[error("{0}")]
    Upstream(String),
}

impl AnalyzeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidUrl | Self::FetchFailed => StatusCode::BAD_REQUEST,
            Self::NotReady | Self::Unparseable | Self::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<AnalyzeError> for ApiError {
    fn from(error: AnalyzeError) -> Self {
        if error.status() == StatusCode::BAD_REQUEST {
            Self::bad_request(error.to_string())
        } else {
            Self::internal(error.to_string())
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            detail: self.detail,
        });

        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_side_failures_map_to_bad_request() {
        assert_eq!(AnalyzeError::InvalidUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AnalyzeError::FetchFailed.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_fault_keeps_its_message() {
        let error = ApiError::from(AnalyzeError::Upstream("quota exceeded".to_string()));
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.detail, "quota exceeded");
    }

    #[test]
    fn not_ready_uses_the_processing_message() {
        let error = ApiError::from(AnalyzeError::NotReady);
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.detail, "Le traitement de la vidéo a échoué côté Google");
    }

    #[test]
    fn invalid_url_renders_as_bad_request_detail() {
        let error = ApiError::from(AnalyzeError::InvalidUrl);
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.detail, "URL TikTok invalide");
    }
}
