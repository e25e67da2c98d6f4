use std::{io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tokio::{
    process::Command,
    time::{Duration, timeout},
};

use crate::error::ApiError;

const YT_DLP_TIMEOUT_SECONDS: u64 = 1800;

// Cabeceras de Chrome 127 para evitar deteccion de bots
const ANTI_BOT_HEADERS: [(&str, &str); 16] = [
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
    ),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Accept-Encoding", "gzip, deflate, br, zstd"),
    ("DNT", "1"),
    ("Connection", "keep-alive"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    (
        "Sec-CH-UA",
        "\"Not)A;Brand\";v=\"99\", \"Google Chrome\";v=\"127\", \"Chromium\";v=\"127\"",
    ),
    ("Sec-CH-UA-Mobile", "?0"),
    ("Sec-CH-UA-Platform", "\"Windows\""),
    ("Cache-Control", "max-age=0"),
    ("Sec-GPC", "1"),
];

const EXTRACTOR_ARGS: &str =
    "youtube:player_client=android,web;player_skip=webpage;comment_sort=top;max_comments=0";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: u32,
    pub cap_seconds: u32,
    pub extractor_retries: u32,
    pub file_access_retries: u32,
    pub fragment_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: 4,
            cap_seconds: 60,
            extractor_retries: 5,
            file_access_retries: 5,
            fragment_retries: 15,
        }
    }
}

impl RetryPolicy {
    fn sleep_expr(&self) -> String {
        format!("exp=1:{}:{}", self.cap_seconds, self.base)
    }

    fn push_args(&self, args: &mut Vec<String>) {
        args.push("--extractor-retries".to_string());
        args.push(self.extractor_retries.to_string());
        args.push("--file-access-retries".to_string());
        args.push(self.file_access_retries.to_string());
        args.push("--fragment-retries".to_string());
        args.push(self.fragment_retries.to_string());

        let expr = self.sleep_expr();
        for category in ["http", "fragment", "file_access", "extractor"] {
            args.push("--retry-sleep".to_string());
            args.push(format!("{category}:{expr}"));
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub quality: String,
    pub format: String,
    pub output_dir: PathBuf,
    pub cookie_file: Option<PathBuf>,
    pub retry: RetryPolicy,
}

impl DownloadOptions {
    pub fn new(
        quality: impl Into<String>,
        format: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        cookie_file: Option<PathBuf>,
    ) -> Self {
        Self {
            quality: quality.into(),
            format: format.into(),
            output_dir: output_dir.into(),
            cookie_file,
            retry: RetryPolicy::default(),
        }
    }

    pub fn format_selector(&self) -> String {
        format!(
            "{quality}[ext={format}]/best[ext={format}]/best",
            quality = self.quality,
            format = self.format
        )
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--geo-bypass".to_string(),
            "--sleep-interval".to_string(),
            "1".to_string(),
            "--max-sleep-interval".to_string(),
            "5".to_string(),
            "--sleep-subtitles".to_string(),
            "1".to_string(),
            "--extractor-args".to_string(),
            EXTRACTOR_ARGS.to_string(),
        ];

        for (name, value) in ANTI_BOT_HEADERS {
            args.push("--add-header".to_string());
            args.push(format!("{name}:{value}"));
        }

        self.retry.push_args(&mut args);

        if let Some(cookie_file) = &self.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().to_string());
        }

        args
    }

    pub fn info_args(&self, url: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.push("-J".to_string());
        args.push(url.to_string());
        args
    }

    pub fn download_args(&self, url: &str, safe_title: &str) -> Vec<String> {
        let stem = if safe_title.is_empty() {
            "video"
        } else {
            safe_title
        };
        let template = self.output_dir.join(format!("{stem}.%(ext)s"));

        let mut args = self.common_args();
        args.push("-o".to_string());
        args.push(template.to_string_lossy().to_string());
        args.push("-f".to_string());
        args.push(self.format_selector());
        args.push("--newline".to_string());
        args.push("--print".to_string());
        args.push("after_move:filepath".to_string());
        args.push(url.to_string());
        args
    }
}

#[derive(Debug, Deserialize)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub format_note: Option<String>,
    pub filesize: Option<f64>,
}

pub async fn run_yt_dlp(bin: &str, args: Vec<String>) -> Result<std::process::Output, ApiError> {
    let command_future = Command::new(bin).args(args).output();
    let output = timeout(Duration::from_secs(YT_DLP_TIMEOUT_SECONDS), command_future)
        .await
        .map_err(|_| ApiError::internal("yt-dlp excedio el tiempo limite de la operacion."))?
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ApiError::internal(
                    "yt-dlp no esta instalado en el sistema. Instala yt-dlp y reinicia el backend.",
                )
            } else {
                ApiError::internal(format!("No se pudo ejecutar yt-dlp: {error}"))
            }
        })?;

    if !output.status.success() {
        return Err(ApiError::internal(run_error_message(&output.stderr)));
    }

    Ok(output)
}

pub async fn fetch_video_info(
    bin: &str,
    options: &DownloadOptions,
    url: &str,
) -> Result<VideoInfo, ApiError> {
    let output = run_yt_dlp(bin, options.info_args(url)).await?;
    serde_json::from_slice(&output.stdout).map_err(|error| {
        ApiError::internal(format!("No se pudo interpretar la respuesta de yt-dlp: {error}"))
    })
}

pub fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp no pudo completar la operacion")
        .to_string()
}

pub fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim_end()
        .to_string()
}

pub fn is_valid_video_url(input: &str) -> bool {
    match url::Url::parse(input) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
        Err(_) => false,
    }
}
