use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use courier_db::Database;
use courier_db::models::ReapReport;

/// Background task that reaps stale challenges, old audit entries and idle
/// users on a fixed cadence.
pub async fn run_maintenance_loop(db: Arc<Database>, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match reap_once(db.clone()).await {
            Ok(report) => {
                if report != ReapReport::default() {
                    info!(
                        "Maintenance: deleted {} challenges, pruned {} audit entries, deactivated {} users",
                        report.challenges_deleted, report.actions_pruned, report.users_deactivated
                    );
                }
            }
            Err(e) => {
                warn!("Maintenance error: {}", e);
            }
        }
    }
}

async fn reap_once(db: Arc<Database>) -> anyhow::Result<ReapReport> {
    let report = tokio::task::spawn_blocking(move || db.reap_expired()).await??;
    Ok(report)
}
