use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

const OUTPUT_STEM: &str = "video";
const FORMAT_SELECTOR: &str = "mp4/best[ext=mp4]/best";

/// Fetches a remote video into a local directory.
///
/// `None` means the link could not be fetched, for whatever reason. Callers
/// are not expected to tell the reasons apart.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    async fn fetch(&self, url: &str, output_dir: &Path) -> Option<PathBuf>;
}

pub struct YtDlpFetcher {
    binary: String,
    timeout: Duration,
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn args(url: &str, output_dir: &Path) -> Vec<String> {
        let output_template = output_dir.join(format!("{OUTPUT_STEM}.%(ext)s"));

        vec![
            "--no-warnings".to_string(),
            "--quiet".to_string(),
            "-f".to_string(),
            FORMAT_SELECTOR.to_string(),
            "-o".to_string(),
            output_template.to_string_lossy().into_owned(),
            "--no-playlist".to_string(),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl VideoFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, output_dir: &Path) -> Option<PathBuf> {
        let args = Self::args(url, output_dir);
        debug!("yt-dlp {:?}", args);

        let command_future = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.timeout, command_future).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                if error.kind() == ErrorKind::NotFound {
                    warn!(
                        "{} est introuvable. Installez yt-dlp ou configurez YT_DLP_BIN.",
                        self.binary
                    );
                } else {
                    warn!("Impossible de lancer {} : {error}", self.binary);
                }
                return None;
            }
            Err(_) => {
                warn!(
                    "Le téléchargement a dépassé {} s pour {:?}",
                    self.timeout.as_secs(),
                    url
                );
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                "yt-dlp a échoué ({}) pour {:?} : {}",
                output.status,
                url,
                run_error_message(&output.stderr)
            );
            return None;
        }

        let located = locate_video_file(output_dir).await;
        if located.is_none() {
            warn!("yt-dlp n'a produit aucun fichier {OUTPUT_STEM}.* pour {:?}", url);
        }
        located
    }
}

fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("aucune sortie d'erreur")
        .to_string()
}

/// Finds the file yt-dlp wrote under the fixed output stem.
pub async fn locate_video_file(output_dir: &Path) -> Option<PathBuf> {
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            warn!("Impossible de lire le dossier temporaire {:?} : {error}", output_dir);
            return None;
        }
    };

    let prefix = format!("{OUTPUT_STEM}.");
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(error) => {
                warn!("Impossible de parcourir le dossier temporaire : {error}");
                return None;
            }
        };

        let is_candidate = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&prefix) && !name.ends_with(".part"));
        let is_file = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);

        if is_candidate && is_file {
            return Some(entry.path());
        }
    }
}

/// Media type declared to the model when uploading a downloaded file.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "3gp" => "video/3gpp",
        _ => "video/mp4",
    }
}
