use std::path::{Path, PathBuf};

use axum::{
    Json, Router,
    body::Body,
    extract::{Multipart, Path as RoutePath, Query, State},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::ApiError,
    jobs::{DownloadStatus, JobRegistry},
    store::ArtifactStore,
    ytdlp::{
        DownloadOptions, extract_printed_path, fetch_video_info, is_valid_video_url, run_yt_dlp,
        sanitize_title,
    },
};

const DOWNLOADED_FILE_NOT_FOUND: &str = "No se encontro el archivo descargado.";
const UNKNOWN_DOWNLOAD_ID: &str = "No existe una descarga con ese ID.";
const DESCRIPTION_LIMIT: usize = 500;
const MAX_FORMATS: usize = 10;

const HOME_PAGE: &str = r#"<h1>API de descarga de videos</h1>
<h2>Endpoints:</h2>
<ul>
    <li><strong>POST /upload-cookies</strong> - Subir archivo cookies.txt</li>
    <li><strong>POST /set-cookies</strong> - Enviar cookies via JSON</li>
    <li><strong>GET /info?url=VIDEO_URL</strong> - Obtener informacion del video</li>
    <li><strong>GET /download?url=VIDEO_URL&quality=best&format=mp4</strong> - Descargar video</li>
    <li><strong>GET /file/DOWNLOAD_ID</strong> - Descargar archivo por ID</li>
    <li><strong>GET /status/DOWNLOAD_ID</strong> - Consultar estado de la descarga</li>
</ul>
<p>Calidades: worst, best, o una especifica como 720p, 1080p.</p>
<p>Formatos: mp4, webm, mkv, etc.</p>
<p>Los archivos descargados expiran a los pocos minutos.</p>"#;

#[derive(Clone)]
pub struct AppState {
    pub registry: JobRegistry,
    pub store: ArtifactStore,
    pub cookie_path: PathBuf,
    pub ytdlp_bin: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(home))
        .route("/upload-cookies", post(upload_cookies))
        .route("/set-cookies", post(set_cookies))
        .route("/info", get(video_info))
        .route("/download", get(download_video))
        .route("/file/{id}", get(get_file))
        .route("/status/{id}", get(get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn home() -> Html<&'static str> {
    Html(HOME_PAGE)
}

async fn upload_cookies(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::bad_request(format!("Formulario invalido: {error}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content = field
            .text()
            .await
            .map_err(|error| ApiError::bad_request(format!("Archivo invalido: {error}")))?;

        if content.trim().is_empty() {
            return Err(ApiError::bad_request("El archivo de cookies esta vacio."));
        }

        write_cookie_file(&state.cookie_path, &content).await?;
        return Ok(Json(
            serde_json::json!({"message": "Cookies subidas correctamente"}),
        ));
    }

    Err(ApiError::bad_request("No se recibio ningun archivo."))
}

#[derive(Debug, Deserialize)]
struct SetCookiesRequest {
    #[serde(default)]
    cookies: String,
}

async fn set_cookies(
    State(state): State<AppState>,
    Json(payload): Json<SetCookiesRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if payload.cookies.trim().is_empty() {
        return Err(ApiError::bad_request("No se recibio contenido de cookies."));
    }

    write_cookie_file(&state.cookie_path, &payload.cookies).await?;
    Ok(Json(
        serde_json::json!({"message": "Cookies configuradas correctamente"}),
    ))
}

async fn write_cookie_file(path: &Path, content: &str) -> Result<(), ApiError> {
    tokio::fs::write(path, content).await.map_err(|error| {
        ApiError::internal(format!("No se pudo guardar el archivo de cookies: {error}"))
    })?;

    info!("Archivo de cookies actualizado ({} bytes)", content.len());
    Ok(())
}

#[derive(Debug, Deserialize)]
struct InfoQuery {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    upload_date: Option<String>,
    view_count: Option<i64>,
    like_count: Option<i64>,
    description: String,
    thumbnail: Option<String>,
    formats: Vec<FormatDescriptor>,
}

#[derive(Debug, Serialize)]
struct FormatDescriptor {
    format_id: Option<String>,
    ext: Option<String>,
    quality: Option<String>,
    filesize: Option<f64>,
}

async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> Result<Json<InfoResponse>, ApiError> {
    let url = validate_url(query.url.as_deref())?;

    let options = download_options(&state, "best", "mp4");
    let info = fetch_video_info(&state.ytdlp_bin, &options, &url).await?;

    let formats = info
        .formats
        .into_iter()
        .take(MAX_FORMATS)
        .map(|format| FormatDescriptor {
            format_id: format.format_id,
            ext: format.ext,
            quality: format.format_note,
            filesize: format.filesize,
        })
        .collect();

    Ok(Json(InfoResponse {
        title: info.title,
        duration: info.duration,
        uploader: info.uploader,
        upload_date: info.upload_date,
        view_count: info.view_count,
        like_count: info.like_count,
        description: truncate_description(info.description.as_deref()),
        thumbnail: info.thumbnail,
        formats,
    }))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    url: Option<String>,
    quality: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    download_id: Uuid,
    status: DownloadStatus,
    filename: String,
    download_url: String,
    title: String,
}

struct CompletedDownload {
    filename: String,
    title: String,
}

async fn download_video(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let url = validate_url(query.url.as_deref())?;
    let quality = non_empty_or(query.quality.as_deref(), "best");
    let format = non_empty_or(query.format.as_deref(), "mp4");

    let id = state.registry.create(&url).await;

    match run_extraction(&state, &url, &quality, &format).await {
        Ok(done) => {
            if let Err(error) = state.registry.mark_completed(id, &done.filename).await {
                warn!("No se pudo marcar la descarga {id} como completada: {error}");
            }
            info!("Descarga {id} completada: {}", done.filename);

            Ok(Json(DownloadResponse {
                download_id: id,
                status: DownloadStatus::Completed,
                filename: done.filename,
                download_url: format!("/file/{id}"),
                title: done.title,
            }))
        }
        Err(error) => {
            if let Err(transition) = state.registry.mark_error(id, &error.message).await {
                warn!("No se pudo marcar la descarga {id} como fallida: {transition}");
            }
            warn!("Descarga {id} fallida: {}", error.message);
            Err(error)
        }
    }
}

async fn run_extraction(
    state: &AppState,
    url: &str,
    quality: &str,
    format: &str,
) -> Result<CompletedDownload, ApiError> {
    let options = download_options(state, quality, format);

    let info = fetch_video_info(&state.ytdlp_bin, &options, url).await?;
    let title = info
        .title
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "video".to_string());
    let safe_title = sanitize_title(&title);

    let output = run_yt_dlp(&state.ytdlp_bin, options.download_args(url, &safe_title)).await?;

    let printed = extract_printed_path(&output.stdout);
    match resolve_artifact(state, printed.as_deref()).await {
        Some(filename) => Ok(CompletedDownload { filename, title }),
        None => Err(ApiError::internal(DOWNLOADED_FILE_NOT_FOUND)),
    }
}

async fn resolve_artifact(state: &AppState, printed: Option<&str>) -> Option<String> {
    if let Some(printed) = printed {
        let path = Path::new(printed);
        if path.parent() == Some(state.store.dir())
            && let Ok(metadata) = tokio::fs::metadata(path).await
            && metadata.is_file()
        {
            return path
                .file_name()
                .and_then(|name| name.to_str())
                .map(ToString::to_string);
        }
    }

    let claimed = state.registry.claimed_filenames().await;
    state.store.resolve_newly_created(&claimed, Utc::now()).await
}

async fn get_file(
    State(state): State<AppState>,
    RoutePath(id): RoutePath<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::not_found(UNKNOWN_DOWNLOAD_ID))?;
    let record = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(UNKNOWN_DOWNLOAD_ID))?;

    if record.status != DownloadStatus::Completed {
        return Err(ApiError::bad_request(format!(
            "La descarga no ha terminado. Estado: {}",
            record.status
        )));
    }

    let filename = record
        .filename
        .ok_or_else(|| ApiError::internal("Registro completado sin archivo asociado."))?;
    let path = state.store.path_of(&filename);

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("El archivo ya no esta disponible."));
        }
        Err(error) => {
            return Err(ApiError::internal(format!(
                "No se pudo leer el archivo descargado: {error}"
            )));
        }
    };

    let file = tokio::fs::File::open(&path).await.map_err(|error| {
        ApiError::internal(format!("No se pudo abrir el archivo descargado: {error}"))
    })?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::internal("No se pudo crear el tamano de descarga."))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("No se pudo crear la cabecera de descarga."))?,
    );

    Ok((headers, body).into_response())
}

async fn get_status(
    State(state): State<AppState>,
    RoutePath(id): RoutePath<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::not_found(UNKNOWN_DOWNLOAD_ID))?;
    let record = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(UNKNOWN_DOWNLOAD_ID))?;

    Ok(Json(record).into_response())
}

fn download_options(state: &AppState, quality: &str, format: &str) -> DownloadOptions {
    // un cookies.txt ausente o vacio no impide la descarga
    let usable = std::fs::metadata(&state.cookie_path)
        .map(|metadata| metadata.len() > 0)
        .unwrap_or(false);
    let cookie_file = usable.then(|| state.cookie_path.clone());
    DownloadOptions::new(quality, format, state.store.dir(), cookie_file)
}

fn validate_url(url: Option<&str>) -> Result<String, ApiError> {
    let url = url.map(str::trim).unwrap_or_default();
    if url.is_empty() {
        return Err(ApiError::bad_request("El parametro url es obligatorio."));
    }
    if !is_valid_video_url(url) {
        return Err(ApiError::bad_request("Ingresa una URL valida."));
    }
    Ok(url.to_string())
}

fn non_empty_or(value: Option<&str>, fallback: &str) -> String {
    match value.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
        _ => fallback.to_string(),
    }
}

fn truncate_description(description: Option<&str>) -> String {
    match description {
        Some(text) if !text.is_empty() => {
            let truncated: String = text.chars().take(DESCRIPTION_LIMIT).collect();
            format!("{truncated}...")
        }
        _ => String::new(),
    }
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());

    for character in value.chars() {
        if character.is_ascii_alphanumeric()
            || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
        {
            sanitized.push(character);
        } else {
            sanitized.push('_');
        }
    }

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}
