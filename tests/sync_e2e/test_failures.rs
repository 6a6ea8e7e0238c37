//! Failure E2E tests: a cycle aborts with a typed error instead of
//! reporting partial progress.

use buildbot_syncer_lib::error::{RemoteError, SyncError};
use buildbot_syncer_lib::services::run_sync_cycle;

use super::test_helpers::*;

#[actix_rt::test]
async fn test_rejected_update_fails_the_cycle() {
    let (dashboard, buildbot) = start_servers(&[request(700, 0, 401, "pending")]).await;
    dashboard.state.lock().unwrap().update_status = "WorkerNotFound".to_string();
    let (mut triggerable, app) = create_triggerable(&dashboard, &buildbot, None);

    let result = run_sync_cycle(&mut triggerable, app.as_ref()).await;
    match result {
        Err(SyncError::Remote(RemoteError::Status { path, status })) => {
            assert_eq!(path, UPDATES_PATH);
            assert_eq!(status, "WorkerNotFound");
        }
        other => panic!("expected a status error, got {:?}", other),
    }
    // The force build already went out.
    assert_eq!(buildbot.forced().len(), 1);
}

#[actix_rt::test]
async fn test_unknown_builder_fails_before_syncing() {
    let (dashboard, buildbot) = start_servers(&[request(700, 0, 401, "pending")]).await;
    buildbot.state.lock().unwrap().builders.clear();
    let (mut triggerable, app) = create_triggerable(&dashboard, &buildbot, None);

    let result = run_sync_cycle(&mut triggerable, app.as_ref()).await;
    assert!(matches!(
        result,
        Err(SyncError::UnknownBuilder(ref name)) if name == IPAD_BUILDER
    ));
    assert!(buildbot.forced().is_empty());
    assert!(dashboard.posts_to("/api/update-triggerable/").is_empty());
    assert!(dashboard.posts_to(UPDATES_PATH).is_empty());
}

#[actix_rt::test]
async fn test_unreachable_buildbot_fails_the_cycle() {
    let (dashboard, buildbot) = start_servers(&[]).await;
    let (mut triggerable, app) = {
        let mut unreachable = buildbot;
        unreachable.url = "http://127.0.0.1:1".to_string();
        create_triggerable(&dashboard, &unreachable, None)
    };

    let result = run_sync_cycle(&mut triggerable, app.as_ref()).await;
    assert!(matches!(
        result,
        Err(SyncError::Remote(RemoteError::Transport { .. }))
    ));
}
