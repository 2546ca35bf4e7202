use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::model::now_ms;
use crate::session::SessionManager;
use crate::store::WalStore;

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Returns true if a compaction ran.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not needed");
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => {
            info!(appends, "compacted WAL");
            true
        }
        Err(e) => {
            warn!("compaction failed: {e}");
            false
        }
    }
}

/// Background task that drops expired sessions.
pub async fn run_session_sweeper(sessions: Arc<SessionManager>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let removed = sessions.sweep_expired(now_ms());
        if removed > 0 {
            info!("swept {removed} expired sessions");
        }
    }
}
