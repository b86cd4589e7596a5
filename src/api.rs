use axum::{
    body::Body,
    extract::{FromRequest, Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::fs;
use tracing::warn;

use crate::{
    models::{
        ApiConvertResponse, ApiInfoResponse, ConvertAcceptedResponse, JobRecord, JobState,
        ProgressResponse, UrlRequest, ValidateResponse,
    },
    queue::{new_job_id, run_conversion, ConvertTask},
    ytdlp::{is_supported_url, MediaExtractor},
    AppState,
};

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

/// `POST /validate` — check the URL and return video metadata.
pub async fn validate_url(
    State(state): State<AppState>,
    Json(payload): Json<UrlRequest>,
) -> Response {
    let url = payload.url.trim().to_string();
    if url.is_empty() {
        return bad_request("URL manquante");
    }
    if !is_supported_url(&url) {
        return bad_request("URL YouTube invalide");
    }

    match MediaExtractor::new(&state.config).fetch_metadata(&url).await {
        Ok(info) => Json(ValidateResponse { valid: true, info }).into_response(),
        Err(err) => {
            warn!(url = %url, "Metadata lookup failed during validation: {err}");
            bad_request("Impossible de récupérer les informations de la vidéo")
        }
    }
}

/// `POST /convert` — register a job and dispatch it to the worker pool.
/// Returns the progress id immediately; clients poll `/progress/{id}`.
pub async fn convert_video(
    State(state): State<AppState>,
    Json(payload): Json<UrlRequest>,
) -> Response {
    let url = payload.url.trim().to_string();
    if url.is_empty() || !is_supported_url(&url) {
        return bad_request("URL YouTube invalide");
    }

    let job_id = new_job_id("conv");

    // Register before handing out the id, so the first poll can never
    // race the worker and observe not_found.
    state
        .registry
        .insert(JobRecord::new(&job_id, "En attente..."))
        .await;

    let task = ConvertTask {
        job_id: job_id.clone(),
        url,
    };
    if let Err(err) = state.queue_tx.try_send(task) {
        state.registry.remove(&job_id).await;
        warn!("Rejecting conversion, queue unavailable: {err}");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "File de conversion saturée, réessayez plus tard" })),
        )
            .into_response();
    }

    Json(ConvertAcceptedResponse {
        progress_id: job_id,
        message: "Conversion démarrée".to_string(),
    })
    .into_response()
}

/// `GET /progress/{id}`. Unknown ids intentionally answer 200 with a
/// `not_found` status so existing polling clients, which branch on the
/// status field, keep working.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(progress_id): Path<String>,
) -> Json<ProgressResponse> {
    let body = match state.registry.get(&progress_id).await {
        Some(job) => job.to_response(),
        None => ProgressResponse::not_found(),
    };
    Json(body)
}

/// `GET /download/{id}` — stream the finished MP3 as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(progress_id): Path<String>,
) -> Response {
    let Some(job) = state.registry.get(&progress_id).await else {
        return not_found("Fichier non disponible");
    };
    if job.status != JobState::Completed {
        return not_found("Fichier non disponible");
    }
    let (Some(path), Some(file_name)) = (job.file_path, job.file_name) else {
        return not_found("Fichier non trouvé");
    };

    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return not_found("Fichier non trouvé");
        }
        Err(err) => {
            warn!(path = %path.display(), "Failed to read artifact: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Erreur lors du téléchargement" })),
            )
                .into_response();
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .body(Body::from(bytes))
        .unwrap_or_else(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Erreur lors du téléchargement" })),
            )
                .into_response()
        })
}

/// `POST /api/convert` — blocking variant for automation clients that
/// cannot poll (single-shot integrations). Accepts JSON or form bodies.
pub async fn api_convert(
    State(state): State<AppState>,
    JsonOrForm(payload): JsonOrForm<UrlRequest>,
) -> Response {
    let url = payload.url.trim().to_string();
    if url.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "URL required");
    }
    if !is_supported_url(&url) {
        return api_error(StatusCode::BAD_REQUEST, "Invalid YouTube URL");
    }

    let info = match MediaExtractor::new(&state.config).fetch_metadata(&url).await {
        Ok(info) => info,
        Err(err) => {
            warn!(url = %url, "Metadata lookup failed: {err}");
            return api_error(StatusCode::BAD_REQUEST, "Could not extract video information");
        }
    };

    let job_id = new_job_id("api_conv");
    state
        .registry
        .insert(JobRecord::new(&job_id, "Initialisation..."))
        .await;

    match run_conversion(&state, &job_id, &url).await {
        Some(_path) => Json(ApiConvertResponse {
            success: true,
            title: info.title,
            progress_id: job_id.clone(),
            download_url: format!("/download/{job_id}"),
        })
        .into_response(),
        None => api_error(StatusCode::INTERNAL_SERVER_ERROR, "Conversion failed"),
    }
}

/// `POST /api/info` — metadata-only lookup, JSON or form body.
pub async fn api_info(
    State(state): State<AppState>,
    JsonOrForm(payload): JsonOrForm<UrlRequest>,
) -> Response {
    let url = payload.url.trim().to_string();
    if url.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "URL required");
    }
    if !is_supported_url(&url) {
        return api_error(StatusCode::BAD_REQUEST, "Invalid YouTube URL");
    }

    match MediaExtractor::new(&state.config).fetch_metadata(&url).await {
        Ok(info) => Json(ApiInfoResponse {
            success: true,
            info,
        })
        .into_response(),
        Err(err) => {
            warn!(url = %url, "Metadata lookup failed: {err}");
            api_error(StatusCode::BAD_REQUEST, "Could not extract video information")
        }
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn api_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message, "success": false }))).into_response()
}

/// The automation endpoints accept either a JSON body or an HTML form,
/// depending on what the calling integration can produce.
pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if content_type.starts_with("application/json") {
            let Json(payload) = Json::<T>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            return Ok(Self(payload));
        }

        let Form(payload) = Form::<T>::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(Self(payload))
    }
}
