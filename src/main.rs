use std::{io::ErrorKind, path::Path, path::PathBuf, time::Duration};

use tokio::net::TcpListener;
use tracing::{info, warn};

mod error;
mod jobs;
mod reclaim;
mod routes;
mod store;
mod ytdlp;

use crate::{
    error::ApiError, jobs::JobRegistry, reclaim::Reclaimer, routes::AppState,
    store::ArtifactStore,
};

const DOWNLOAD_DIR: &str = "./downloads";
const COOKIE_FILE: &str = "./cookies.txt";
const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_FILE_EXPIRY_SECONDS: i64 = 300;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "videodl_backend=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let store = ArtifactStore::new(DOWNLOAD_DIR);
    store.ensure_dir().await.map_err(|error| {
        ApiError::internal(format!("No se pudo crear la carpeta de descargas: {error}"))
    })?;

    let cookie_path = PathBuf::from(COOKIE_FILE);
    check_cookie_file(&cookie_path);

    let expiry_seconds = read_i64_env("FILE_EXPIRY_SECONDS")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_FILE_EXPIRY_SECONDS);
    let cleanup_interval = read_u64_env("CLEANUP_INTERVAL_SECONDS")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECONDS);
    let ytdlp_bin = std::env::var("YT_DLP_BIN")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
        .unwrap_or_else(|| "yt-dlp".to_string());

    let registry = JobRegistry::new();
    let state = AppState {
        registry: registry.clone(),
        store: store.clone(),
        cookie_path,
        ytdlp_bin,
    };

    let reclaimer = Reclaimer::new(
        registry,
        store,
        expiry_seconds,
        Duration::from_secs(cleanup_interval),
    );
    tokio::spawn(reclaimer.run());

    let app = routes::router(state);

    let addr = resolve_bind_addr();
    let listener = TcpListener::bind(&addr).await.map_err(|error| {
        ApiError::internal(format!("No se pudo iniciar el puerto {addr}: {error}"))
    })?;

    info!("Backend listo en http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("Error del servidor HTTP: {error}")))
}

fn check_cookie_file(path: &Path) {
    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            info!("Archivo cookies.txt encontrado y cargado");
        }
        Ok(_) => warn!("cookies.txt esta vacio"),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            warn!("No hay archivo cookies.txt - algunos videos pueden no ser accesibles");
        }
        Err(error) => warn!("Error leyendo cookies.txt: {error}"),
    }
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn read_i64_env(name: &str) -> Option<i64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    "0.0.0.0:5000".to_string()
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
