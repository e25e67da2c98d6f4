use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadStatus {
    InProgress,
    Completed,
    Error,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadStatus::InProgress => "in-progress",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: DownloadStatus,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub filename: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TransitionError {
    NotFound,
    AlreadyFinished,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::NotFound => f.write_str("no existe un registro con ese ID"),
            TransitionError::AlreadyFinished => {
                f.write_str("el registro ya alcanzo un estado final")
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, url: &str) -> Uuid {
        let id = Uuid::new_v4();
        let record = JobRecord {
            id,
            status: DownloadStatus::InProgress,
            created_at: Utc::now(),
            url: url.to_string(),
            filename: None,
            error: None,
        };

        self.jobs.lock().await.insert(id, record);
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<JobRecord> {
        self.jobs.lock().await.get(&id).cloned()
    }

    pub async fn mark_completed(&self, id: Uuid, filename: &str) -> Result<(), TransitionError> {
        self.transition(id, |record| {
            record.status = DownloadStatus::Completed;
            record.filename = Some(filename.to_string());
        })
        .await
    }

    pub async fn mark_error(&self, id: Uuid, detail: &str) -> Result<(), TransitionError> {
        self.transition(id, |record| {
            record.status = DownloadStatus::Error;
            record.error = Some(detail.to_string());
        })
        .await
    }

    pub async fn remove(&self, id: Uuid) {
        self.jobs.lock().await.remove(&id);
    }

    pub async fn expired_ids(&self, now: DateTime<Utc>, ttl_seconds: i64) -> Vec<Uuid> {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|record| {
                now.signed_duration_since(record.created_at).num_seconds() > ttl_seconds
            })
            .map(|record| record.id)
            .collect()
    }

    pub async fn claimed_filenames(&self) -> HashSet<String> {
        self.jobs
            .lock()
            .await
            .values()
            .filter_map(|record| record.filename.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    #[cfg(test)]
    pub async fn records(&self) -> Vec<JobRecord> {
        self.jobs.lock().await.values().cloned().collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut JobRecord),
    ) -> Result<(), TransitionError> {
        let mut jobs = self.jobs.lock().await;
        let record = jobs.get_mut(&id).ok_or(TransitionError::NotFound)?;

        if record.status != DownloadStatus::InProgress {
            return Err(TransitionError::AlreadyFinished);
        }

        apply(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn create_starts_in_progress() {
        let registry = JobRegistry::new();
        let id = registry.create("https://youtu.be/abc").await;

        let record = registry.get(id).await.unwrap();
        assert_eq!(record.status, DownloadStatus::InProgress);
        assert_eq!(record.url, "https://youtu.be/abc");
        assert!(record.filename.is_none());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn completed_record_has_filename_and_no_error() {
        let registry = JobRegistry::new();
        let id = registry.create("https://youtu.be/abc").await;

        registry.mark_completed(id, "video.mp4").await.unwrap();

        let record = registry.get(id).await.unwrap();
        assert_eq!(record.status, DownloadStatus::Completed);
        assert_eq!(record.filename.as_deref(), Some("video.mp4"));
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn errored_record_has_detail_and_no_filename() {
        let registry = JobRegistry::new();
        let id = registry.create("https://youtu.be/abc").await;

        registry.mark_error(id, "fallo de red").await.unwrap();

        let record = registry.get(id).await.unwrap();
        assert_eq!(record.status, DownloadStatus::Error);
        assert_eq!(record.error.as_deref(), Some("fallo de red"));
        assert!(record.filename.is_none());
    }

    #[tokio::test]
    async fn terminal_states_reject_further_transitions() {
        let registry = JobRegistry::new();
        let id = registry.create("https://youtu.be/abc").await;

        registry.mark_completed(id, "video.mp4").await.unwrap();

        assert_eq!(
            registry.mark_error(id, "tarde").await,
            Err(TransitionError::AlreadyFinished)
        );
        assert_eq!(
            registry.mark_completed(id, "otro.mp4").await,
            Err(TransitionError::AlreadyFinished)
        );

        let record = registry.get(id).await.unwrap();
        assert_eq!(record.status, DownloadStatus::Completed);
        assert_eq!(record.filename.as_deref(), Some("video.mp4"));
    }

    #[tokio::test]
    async fn transition_on_unknown_id_is_a_noop_error() {
        let registry = JobRegistry::new();

        assert_eq!(
            registry.mark_completed(Uuid::new_v4(), "video.mp4").await,
            Err(TransitionError::NotFound)
        );
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = JobRegistry::new();
        let id = registry.create("https://youtu.be/abc").await;

        registry.remove(id).await;
        registry.remove(id).await;

        assert!(registry.get(id).await.is_none());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn expired_ids_scans_by_age() {
        let registry = JobRegistry::new();
        let old = registry.create("https://youtu.be/old").await;
        let fresh = registry.create("https://youtu.be/new").await;

        let now = Utc::now();
        assert!(registry.expired_ids(now, 300).await.is_empty());

        let later = now + Duration::seconds(301);
        let expired = registry.expired_ids(later, 300).await;
        assert!(expired.contains(&old));
        assert!(expired.contains(&fresh));
        assert_eq!(expired.len(), 2);
    }

    #[tokio::test]
    async fn claimed_filenames_only_lists_completed_artifacts() {
        let registry = JobRegistry::new();
        let done = registry.create("https://youtu.be/a").await;
        let _pending = registry.create("https://youtu.be/b").await;
        let failed = registry.create("https://youtu.be/c").await;

        registry.mark_completed(done, "uno.mp4").await.unwrap();
        registry.mark_error(failed, "fallo").await.unwrap();

        let claimed = registry.claimed_filenames().await;
        assert_eq!(claimed.len(), 1);
        assert!(claimed.contains("uno.mp4"));
    }
}
