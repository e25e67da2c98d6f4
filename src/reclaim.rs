use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{jobs::JobRegistry, store::ArtifactStore};

pub struct Reclaimer {
    registry: JobRegistry,
    store: ArtifactStore,
    ttl_seconds: i64,
    interval: Duration,
}

impl Reclaimer {
    pub fn new(
        registry: JobRegistry,
        store: ArtifactStore,
        ttl_seconds: i64,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            ttl_seconds,
            interval,
        }
    }

    pub async fn run(self) {
        info!(
            "Limpieza periodica activa: expiracion {}s, cadencia {}s",
            self.ttl_seconds,
            self.interval.as_secs()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.sweep(Utc::now()).await;
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) {
        let mut removed_files = 0usize;
        for (name, created) in self.store.list_files().await {
            if now.signed_duration_since(created).num_seconds() > self.ttl_seconds {
                self.store.remove(&name).await;
                removed_files += 1;
            }
        }

        let expired = self.registry.expired_ids(now, self.ttl_seconds).await;
        let removed_records = expired.len();
        for id in expired {
            self.registry.remove(id).await;
        }

        if removed_files > 0 || removed_records > 0 {
            info!(
                "Limpieza: {removed_files} archivo(s) y {removed_records} registro(s) eliminados"
            );
        } else {
            debug!("Limpieza sin elementos expirados");
        }
    }
}
