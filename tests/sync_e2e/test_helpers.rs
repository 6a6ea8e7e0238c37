//! Shared fixtures for the sync E2E tests.

use std::sync::Arc;
use std::time::Duration;

use buildbot_syncer_lib::models::Manifest;
use buildbot_syncer_lib::services::buildbot::parse_sync_config;
use buildbot_syncer_lib::services::{
    BasicAuth, BuildbotTriggerable, HttpRemote, RemoteApi, TriggerableOptions,
};
use secrecy::SecretString;
use serde_json::{Value, json};

use super::mock_servers::{BuildbotState, DashboardState, MockBuildbot, MockDashboard};

pub const TRIGGERABLE: &str = "build-webkit-ios";
pub const IPAD_BUILDER: &str = "ABTest-iPad-RunBenchmark-Tests";
pub const IPAD_BUILDER_ID: u64 = 102;
pub const UPDATES_PATH: &str = "/api/build-requests/build-webkit-ios";

pub fn manifest_json() -> Value {
    json!({
        "platforms": {"32": {"name": "iPad", "group": "1"}},
        "tests": {"1": {"name": "Speedometer", "parentId": null}},
        "repositories": {"11": {"name": "WebKit"}, "22": {"name": "iOS"}},
        "triggerables": {
            "7": {
                "name": TRIGGERABLE,
                "repositoryGroups": [
                    {"id": "5", "name": "ios-svn-webkit", "acceptsCustomRoots": true,
                     "repositories": [{"repository": "11"}, {"repository": "22"}]}
                ]
            }
        }
    })
}

pub fn sync_config_json() -> Value {
    json!({
        "triggerableName": TRIGGERABLE,
        "lookbackCount": 2,
        "buildRequestArgument": "build_request_id",
        "slaveArgument": "slavename",
        "repositoryGroups": {
            "ios-svn-webkit": {
                "repositories": ["WebKit", "iOS"],
                "description": "iOS with WebKit",
                "acceptsRoots": true
            }
        },
        "shared": {
            "properties": {
                "desired_image": {"root": "iOS"},
                "roots_dict": {"rootsExcluding": ["iOS"]}
            }
        },
        "types": {
            "speedometer": {
                "test": ["Speedometer"],
                "properties": {"test_name": "speedometer"}
            }
        },
        "builders": {
            "iPad-bench": {
                "builder": IPAD_BUILDER,
                "properties": {"forcescheduler": "ABTest-iPad-RunBenchmark-Tests-ForceScheduler"}
            }
        },
        "configurations": [
            {"type": "speedometer", "builder": "iPad-bench", "platform": "iPad"}
        ]
    })
}

/// A Speedometer request on iPad in group 600.
pub fn request(id: u64, order: i64, commit_set: u64, status: &str) -> Value {
    let status_url = if status == "pending" {
        Value::Null
    } else {
        json!(format!("http://build.webkit.org/builds/{}", id))
    };
    json!({
        "id": id.to_string(), "triggerable": "7", "repositoryGroup": "5", "task": "1",
        "testGroup": "600", "platform": "32", "test": "1", "order": order.to_string(),
        "commitSet": commit_set.to_string(), "status": status, "statusUrl": status_url,
        "createdAt": 1458688514000u64
    })
}

pub fn payload(requests: &[Value]) -> Value {
    let ids: Vec<Value> = requests.iter().map(|r| r["id"].clone()).collect();
    json!({
        "status": "OK",
        "buildRequests": requests,
        "testGroups": [{"id": "600", "task": "1", "name": "Confirm", "createdAt": 1458688514000u64,
                        "hidden": false, "buildRequests": ids}],
        "commitSets": [
            {"id": "401", "revisionItems": [{"commit": "87832"}, {"commit": "93116"}], "customRoots": [], "allRoots": []},
            {"id": "402", "revisionItems": [{"commit": "87832"}, {"commit": "96336"}], "customRoots": [], "allRoots": []}
        ],
        "commits": [
            {"id": "87832", "repository": "22", "revision": "13A452", "time": 1456932773000u64},
            {"id": "93116", "repository": "11", "revision": "197463", "time": 1456931874000u64},
            {"id": "96336", "repository": "11", "revision": "200574", "time": 1458688494000u64}
        ],
        "uploadedFiles": []
    })
}

/// Start both mock servers serving `requests`.
pub async fn start_servers(requests: &[Value]) -> (MockDashboard, MockBuildbot) {
    let mut dashboard_state = DashboardState::new(manifest_json(), payload(requests));
    dashboard_state
        .test_groups
        .insert("600".to_string(), payload(requests));
    let dashboard = MockDashboard::start(dashboard_state).await;

    let buildbot = MockBuildbot::start(BuildbotState {
        builders: vec![(IPAD_BUILDER_ID, IPAD_BUILDER.to_string())],
        ..Default::default()
    })
    .await;

    (dashboard, buildbot)
}

/// Triggerable talking to the mock servers over HTTP.
pub fn create_triggerable(
    dashboard: &MockDashboard,
    buildbot: &MockBuildbot,
    auth: Option<BasicAuth>,
) -> (BuildbotTriggerable, Arc<dyn RemoteApi>) {
    let app: Arc<dyn RemoteApi> =
        Arc::new(HttpRemote::new(&dashboard.url, auth, Duration::from_secs(10)).unwrap());
    let buildbot: Arc<dyn RemoteApi> =
        Arc::new(HttpRemote::new(&buildbot.url, None, Duration::from_secs(10)).unwrap());
    let manifest = Manifest::from_json(&manifest_json()).unwrap();

    let triggerable = BuildbotTriggerable::new(
        parse_sync_config(&sync_config_json()).unwrap(),
        manifest,
        app.clone(),
        buildbot,
        TriggerableOptions {
            worker_name: "sync-worker".to_string(),
            worker_password: SecretString::from("password".to_string()),
            max_root_reuse_age: None,
        },
    )
    .unwrap();
    (triggerable, app)
}

/// Value of a force-build form field.
pub fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}
