//! Background service that keeps one triggerable in sync.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::error::SyncResult;
use crate::services::remote::RemoteApi;
use crate::services::triggerable::{BuildbotTriggerable, SyncReport};
use crate::store;

/// Configuration for the sync service.
#[derive(Debug, Clone)]
pub struct SyncLoopConfig {
    /// Seconds between the starts of consecutive cycles. A cycle that runs
    /// longer delays the next one instead of bursting.
    pub interval_secs: u64,
}

/// Outcome of the most recent cycles, served by the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub triggerable: String,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<SyncReport>,
}

pub type SharedSyncStatus = Arc<RwLock<SyncStatus>>;

impl SyncStatus {
    pub fn new(triggerable: &str) -> Self {
        Self {
            triggerable: triggerable.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: SyncResult<SyncReport>) {
        self.cycles += 1;
        self.last_cycle_at = Some(Utc::now());
        match result {
            Ok(report) => {
                self.last_error = None;
                self.last_report = Some(report);
            }
            Err(e) => {
                self.failed_cycles += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// One full cycle: refresh the manifest, resolve builders, publish the
/// triggerable's configurations, then sync its build requests.
///
/// The manifest is fetched again after `update_triggerable` so newly
/// registered repository groups are visible to validation.
pub async fn run_sync_cycle(
    triggerable: &mut BuildbotTriggerable,
    app: &dyn RemoteApi,
) -> SyncResult<SyncReport> {
    triggerable.set_manifest(store::fetch_manifest(app).await?);
    triggerable.init_syncers().await?;
    triggerable.update_triggerable().await?;
    triggerable.set_manifest(store::fetch_manifest(app).await?);
    triggerable.sync_once().await
}

/// Start the sync background task.
///
/// Failed cycles are logged and retried on the next tick.
pub fn start_sync_task(
    mut triggerable: BuildbotTriggerable,
    app: Arc<dyn RemoteApi>,
    status: SharedSyncStatus,
    config: SyncLoopConfig,
) {
    tokio::spawn(async move {
        info!(
            "Starting sync service (triggerable: {}, interval: {} seconds)",
            triggerable.name(),
            config.interval_secs
        );

        // tokio's interval rejects a zero period.
        let mut ticker = interval(Duration::from_secs(config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let result = run_sync_cycle(&mut triggerable, app.as_ref()).await;
            if let Err(ref e) = result {
                error!("Sync cycle error: {}", e);
            }
            status.write().await.record(result);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RemoteError, SyncError};
    use crate::services::buildbot::config::parse_sync_config;
    use crate::services::buildbot::config::tests::sample_ios_config;
    use crate::services::buildbot::syncer::tests::{
        IPAD_BUILDER, IPHONE_BUILDER, sample_manifest, sample_manifest_json,
    };
    use crate::services::remote::testing::{MockRemote, RecordedRequest};
    use crate::services::triggerable::TriggerableOptions;
    use secrecy::SecretString;
    use serde_json::json;

    fn triggerable(app: Arc<MockRemote>, buildbot: Arc<MockRemote>) -> BuildbotTriggerable {
        BuildbotTriggerable::new(
            parse_sync_config(&sample_ios_config()).unwrap(),
            sample_manifest(),
            app,
            buildbot,
            TriggerableOptions {
                worker_name: "sync-worker".to_string(),
                worker_password: SecretString::from("password".to_string()),
                max_root_reuse_age: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_status_records_success_and_failure() {
        let mut status = SyncStatus::new("build-webkit-ios");
        status.record(Ok(SyncReport {
            scheduled: vec![701],
            ..Default::default()
        }));
        assert_eq!(status.cycles, 1);
        assert!(status.last_error.is_none());

        status.record(Err(SyncError::UnknownBuilder("b".to_string())));
        assert_eq!(status.cycles, 2);
        assert_eq!(status.failed_cycles, 1);
        assert!(status.last_error.as_deref().unwrap().contains("'b'"));
        assert_eq!(status.last_report.as_ref().unwrap().scheduled, vec![701]);
        assert!(status.last_cycle_at.is_some());
    }

    #[tokio::test]
    async fn test_run_sync_cycle_in_order() {
        let app = Arc::new(MockRemote::new("http://perf.webkit.org"));
        let buildbot = Arc::new(MockRemote::new("http://build.webkit.org"));
        app.respond("/data/manifest.json", sample_manifest_json());
        app.respond(
            "/api/build-requests/build-webkit-ios",
            json!({"status": "OK", "buildRequests": [], "commitSets": [], "commits": []}),
        );
        buildbot.respond(
            "/api/v2/builders",
            json!({"builders": [
                {"builderid": 1, "name": IPHONE_BUILDER},
                {"builderid": 2, "name": IPAD_BUILDER}
            ]}),
        );
        for builder in [IPHONE_BUILDER, IPAD_BUILDER] {
            buildbot.respond(&format!("/json/builders/{}/pendingBuilds", builder), json!([]));
            buildbot.respond(
                &format!("/json/builders/{}/builds/?select=-1&select=-2", builder),
                json!({}),
            );
        }

        let mut triggerable = triggerable(app.clone(), buildbot.clone());
        let report = run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap();
        assert!(report.updates.is_empty());
        assert_eq!(triggerable.syncers()[2].builder_id(), Some(2));

        let paths: Vec<String> = app
            .requests()
            .into_iter()
            .map(|request| match request {
                RecordedRequest::Get(path)
                | RecordedRequest::PostJson(path, _)
                | RecordedRequest::PostForm(path, _) => path,
            })
            .collect();
        assert_eq!(
            paths,
            vec![
                "/data/manifest.json",
                "/api/update-triggerable/",
                "/data/manifest.json",
                "/api/build-requests/build-webkit-ios",
                "/api/build-requests/build-webkit-ios",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_sync_cycle_stops_at_first_failure() {
        let app = Arc::new(MockRemote::new("http://perf.webkit.org"));
        let buildbot = Arc::new(MockRemote::new("http://build.webkit.org"));
        app.respond("/data/manifest.json", sample_manifest_json());
        buildbot.fail("/api/v2/builders");

        let mut triggerable = triggerable(app.clone(), buildbot);
        let err = run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Remote(RemoteError::HttpStatus { status: 500, .. })
        ));
        assert!(app.json_posts().is_empty());
    }
}
