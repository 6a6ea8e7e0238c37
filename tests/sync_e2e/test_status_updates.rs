//! Status update E2E tests: buildbot progress is reported back to the dashboard.

use buildbot_syncer_lib::services::{BasicAuth, run_sync_cycle};
use secrecy::SecretString;
use serde_json::{Value, json};

use super::test_helpers::*;

fn running_build(request_id: u64, number: u64) -> Value {
    json!({
        "builderName": IPAD_BUILDER,
        "number": number,
        "currentStep": {"name": "run-benchmark", "isStarted": true},
        "results": null,
        "slave": "ABTest-iPad-0",
        "text": ["running"],
        "times": [1458718189.53, null],
        "properties": [
            ["build_request_id", request_id.to_string(), "Force Build Form"],
            ["slavename", "ABTest-iPad-0", "BuildSlave"]
        ]
    })
}

#[actix_rt::test]
async fn test_running_build_is_reported() {
    let requests = [request(700, 0, 401, "scheduled"), request(701, 1, 402, "pending")];
    let (dashboard, buildbot) = start_servers(&requests).await;
    buildbot
        .state
        .lock()
        .unwrap()
        .recent
        .insert(IPAD_BUILDER.to_string(), json!({"-1": running_build(700, 615)}));
    let (mut triggerable, app) = create_triggerable(&dashboard, &buildbot, None);

    let report = run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap();

    // The group waits for its running request.
    assert!(report.scheduled.is_empty());
    assert!(buildbot.forced().is_empty());

    let updates = dashboard.posts_to(UPDATES_PATH);
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0]["buildRequestUpdates"],
        json!({
            "700": {
                "status": "running",
                "url": format!("{}/#/builders/{}/builds/615", buildbot.url, IPAD_BUILDER_ID),
                "statusDescription": "running"
            }
        })
    );
}

#[actix_rt::test]
async fn test_dashboard_requests_use_basic_auth() {
    let (dashboard, buildbot) = start_servers(&[request(700, 0, 401, "pending")]).await;
    let auth = BasicAuth {
        username: "sync".to_string(),
        password: SecretString::from("secret".to_string()),
    };
    let (mut triggerable, app) = create_triggerable(&dashboard, &buildbot, Some(auth));

    run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap();

    let authorizations = dashboard.state.lock().unwrap().authorizations.clone();
    assert!(!authorizations.is_empty());
    assert!(
        authorizations
            .iter()
            .all(|header| header.as_deref() == Some("Basic c3luYzpzZWNyZXQ="))
    );
}

#[actix_rt::test]
async fn test_missing_build_is_reported_as_failed_if_not_completed() {
    let requests = [request(700, 0, 401, "running"), request(701, 1, 402, "pending")];
    let (dashboard, buildbot) = start_servers(&requests).await;
    let (mut triggerable, app) = create_triggerable(&dashboard, &buildbot, None);

    run_sync_cycle(&mut triggerable, app.as_ref()).await.unwrap();

    let updates = dashboard.posts_to(UPDATES_PATH);
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0]["buildRequestUpdates"]["700"],
        json!({"status": "failedIfNotCompleted"})
    );
}
