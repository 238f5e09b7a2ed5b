use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::store;

/// Article retention loop. Wakes every hour; a zero retention disables
/// pruning entirely (articles are otherwise never deleted by the
/// pipeline).
pub async fn cleanup_loop(pool: SqlitePool, config: Arc<Config>, cancel: CancellationToken) {
    let retention = match humantime::parse_duration(&config.vestnik.retention) {
        Ok(d) if !d.is_zero() => chrono::Duration::from_std(d).unwrap_or(chrono::Duration::days(365)),
        _ => {
            info!("article retention disabled");
            return;
        }
    };

    info!(retention = %config.vestnik.retention, "cleanup job started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cleanup job shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(3600)) => {}
        }

        let cutoff = Utc::now() - retention;
        match store::delete_articles_older_than(&pool, cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, cutoff = %cutoff.to_rfc3339(), "pruned old articles");
                }
            }
            Err(e) => {
                error!(error = %e, "article cleanup failed");
            }
        }
    }
}
