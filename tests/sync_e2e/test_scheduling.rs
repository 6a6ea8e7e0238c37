//! Scheduling E2E tests: force builds land on buildbot and the dashboard
//! hears about them in the same cycle.

use buildbot_syncer_lib::services::run_sync_cycle;
use serde_json::json;

use super::test_helpers::*;

#[actix_rt::test]
async fn test_cycle_schedules_first_pending_request() {
    let requests = [request(700, 0, 401, "pending"), request(701, 1, 402, "pending")];
    let (dashboard, buildbot) = start_servers(&requests).await;
    let (mut triggerable, app) = create_triggerable(&dashboard, &buildbot, None);

    let report = run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap();
    assert_eq!(report.scheduled, vec![700]);
    assert!(report.excluded.is_empty());

    let forced = buildbot.forced();
    assert_eq!(forced.len(), 1);
    let (builder, fields) = &forced[0];
    assert_eq!(builder, IPAD_BUILDER);
    assert_eq!(field(fields, "build_request_id"), Some("700"));
    assert_eq!(field(fields, "desired_image"), Some("13A452"));
    assert_eq!(field(fields, "test_name"), Some("speedometer"));
    assert_eq!(
        field(fields, "forcescheduler"),
        Some("ABTest-iPad-RunBenchmark-Tests-ForceScheduler")
    );
    let roots: serde_json::Value =
        serde_json::from_str(field(fields, "roots_dict").unwrap()).unwrap();
    assert_eq!(roots["WebKit"]["revision"], "197463");
    assert!(roots.get("iOS").is_none());

    let updates = dashboard.posts_to(UPDATES_PATH);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["workerName"], "sync-worker");
    assert_eq!(updates[0]["workerPassword"], "password");
    assert_eq!(
        updates[0]["buildRequestUpdates"],
        json!({
            "700": {
                "status": "scheduled",
                "url": format!("{}/#/builders/{}", buildbot.url, IPAD_BUILDER_ID)
            }
        })
    );
}

#[actix_rt::test]
async fn test_second_cycle_does_not_schedule_again() {
    let requests = [request(700, 0, 401, "pending"), request(701, 1, 402, "pending")];
    let (dashboard, buildbot) = start_servers(&requests).await;
    let (mut triggerable, app) = create_triggerable(&dashboard, &buildbot, None);

    run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap();
    // The dashboard never applied the update, but buildbot still has the build queued.
    let report = run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap();

    assert!(report.scheduled.is_empty());
    assert_eq!(buildbot.forced().len(), 1);
    assert_eq!(dashboard.posts_to(UPDATES_PATH).len(), 2);
}

#[actix_rt::test]
async fn test_cycle_reports_triggerable_configurations() {
    let (dashboard, buildbot) = start_servers(&[]).await;
    let (mut triggerable, app) = create_triggerable(&dashboard, &buildbot, None);

    let report = run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap();
    assert!(report.updates.is_empty());
    assert!(buildbot.forced().is_empty());

    let posts = dashboard.posts_to("/api/update-triggerable/");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["triggerable"], TRIGGERABLE);
    assert_eq!(posts[0]["configurations"], json!([{"test": 1, "platform": 32}]));
    assert_eq!(
        posts[0]["repositoryGroups"],
        json!([{
            "name": "ios-svn-webkit",
            "description": "iOS with WebKit",
            "acceptsRoots": true,
            "repositories": [{"repository": 11}, {"repository": 22}]
        }])
    );
}
