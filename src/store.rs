use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::warn;

const RECENCY_WINDOW_SECONDS: i64 = 30;

#[derive(Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub async fn list_files(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!("No se pudo abrir la carpeta de descargas: {error}");
                }
                return Vec::new();
            }
        };

        let mut files = Vec::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!("No se pudo iterar la carpeta de descargas: {error}");
                    break;
                }
            };

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("No se pudo leer metadata de {:?}: {error}", entry.path());
                    continue;
                }
            };

            if !metadata.is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(ToString::to_string) else {
                continue;
            };

            // btime no esta disponible en todos los filesystems
            let created = metadata.created().or_else(|_| metadata.modified());
            match created {
                Ok(created) => files.push((name, DateTime::<Utc>::from(created))),
                Err(error) => {
                    warn!("No se pudo leer fecha de creacion de {name}: {error}");
                }
            }
        }

        files
    }

    pub async fn remove(&self, name: &str) {
        let path = self.path_of(name);
        if let Err(error) = tokio::fs::remove_file(&path).await
            && error.kind() != ErrorKind::NotFound
        {
            warn!("No se pudo eliminar el archivo {:?}: {error}", path);
        }
    }

    pub async fn resolve_newly_created(
        &self,
        claimed: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        self.list_files()
            .await
            .into_iter()
            .filter(|(name, created)| {
                !claimed.contains(name)
                    && now.signed_duration_since(*created).num_seconds() <= RECENCY_WINDOW_SECONDS
            })
            .max_by_key(|(_, created)| *created)
            .map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with_dir() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (ArtifactStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn list_files_sees_regular_files_only() {
        let (store, dir) = store_with_dir();
        std::fs::write(dir.path().join("video.mp4"), b"datos").unwrap();
        std::fs::create_dir(dir.path().join("subcarpeta")).unwrap();

        let files = store.list_files().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "video.mp4");
    }

    #[tokio::test]
    async fn list_files_on_missing_dir_is_empty() {
        let store = ArtifactStore::new("/ruta/que/no/existe");
        assert!(store.list_files().await.is_empty());
    }

    #[tokio::test]
    async fn remove_missing_file_is_silent() {
        let (store, _dir) = store_with_dir();
        store.remove("inexistente.mp4").await;
    }

    #[tokio::test]
    async fn remove_deletes_the_file() {
        let (store, dir) = store_with_dir();
        std::fs::write(dir.path().join("video.mp4"), b"datos").unwrap();

        store.remove("video.mp4").await;
        assert!(!dir.path().join("video.mp4").exists());
    }

    #[tokio::test]
    async fn resolve_finds_a_fresh_unclaimed_file() {
        let (store, dir) = store_with_dir();
        std::fs::write(dir.path().join("nuevo.mp4"), b"datos").unwrap();

        let resolved = store
            .resolve_newly_created(&HashSet::new(), Utc::now())
            .await;
        assert_eq!(resolved.as_deref(), Some("nuevo.mp4"));
    }

    #[tokio::test]
    async fn resolve_skips_claimed_files() {
        let (store, dir) = store_with_dir();
        std::fs::write(dir.path().join("reclamado.mp4"), b"datos").unwrap();

        let claimed: HashSet<String> = ["reclamado.mp4".to_string()].into_iter().collect();
        let resolved = store.resolve_newly_created(&claimed, Utc::now()).await;
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn resolve_ignores_files_outside_the_recency_window() {
        let (store, dir) = store_with_dir();
        std::fs::write(dir.path().join("viejo.mp4"), b"datos").unwrap();

        let future = Utc::now() + Duration::seconds(120);
        let resolved = store.resolve_newly_created(&HashSet::new(), future).await;
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn resolve_prefers_the_newest_candidate() {
        let (store, dir) = store_with_dir();
        std::fs::write(dir.path().join("primero.mp4"), b"datos").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        std::fs::write(dir.path().join("segundo.mp4"), b"datos").unwrap();

        let resolved = store
            .resolve_newly_created(&HashSet::new(), Utc::now())
            .await;
        assert_eq!(resolved.as_deref(), Some("segundo.mp4"));
    }
}
