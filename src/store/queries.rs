//! Dashboard fetches that fill a [`ModelStore`], and lookups over it.

use chrono::{Duration, Utc};
use futures_util::future::try_join_all;
use tracing::debug;

use crate::error::SyncResult;
use crate::models::{BuildRequest, Id, Manifest};
use crate::services::remote::RemoteApi;

use super::{Ingested, ModelStore};

/// Fetch `/data/manifest.json`.
pub async fn fetch_manifest(remote: &dyn RemoteApi) -> SyncResult<Manifest> {
    let content = remote.get_json("/data/manifest.json").await?;
    Ok(Manifest::from_json(&content)?)
}

/// Load every outstanding build request of a triggerable.
pub async fn fetch_for_triggerable(
    remote: &dyn RemoteApi,
    store: &mut ModelStore,
    manifest: &Manifest,
    triggerable_name: &str,
) -> SyncResult<Vec<Id>> {
    let path = format!(
        "/api/build-requests/{}",
        urlencoding::encode(triggerable_name)
    );
    let content = remote.get_json_with_status(&path).await?;
    let ingested = store.ingest(&content, manifest)?;
    debug!(
        "Fetched {} build requests for {}",
        ingested.build_requests.len(),
        triggerable_name
    );
    Ok(ingested.build_requests)
}

/// Fetch the given test groups concurrently, bypassing anything already stored.
pub async fn fetch_test_groups(
    remote: &dyn RemoteApi,
    store: &mut ModelStore,
    manifest: &Manifest,
    group_ids: &[Id],
) -> SyncResult<Ingested> {
    let paths: Vec<String> = group_ids
        .iter()
        .map(|id| format!("/api/test-groups/{}", id))
        .collect();
    let payloads = try_join_all(paths.iter().map(|path| remote.get_json_with_status(path))).await?;

    let mut ingested = Ingested::default();
    for payload in &payloads {
        let found = store.ingest(payload, manifest)?;
        ingested.test_groups.extend(found.test_groups);
        ingested.build_requests.extend(found.build_requests);
    }
    Ok(ingested)
}

/// Fetch every test group of an analysis task.
pub async fn fetch_test_groups_for_task(
    remote: &dyn RemoteApi,
    store: &mut ModelStore,
    manifest: &Manifest,
    task: Id,
) -> SyncResult<Ingested> {
    let content = remote
        .get_json_with_status(&format!("/api/test-groups?task={}", task))
        .await?;
    store.ingest(&content, manifest)
}

/// Find a build request in another visible group of the same analysis task
/// whose build can stand in for `request`'s.
///
/// Candidates build on a platform of the same platform group, use an equal
/// commit set ignoring built roots, and still have every root available.
/// A completed candidate wins; otherwise the earliest running one, then the
/// earliest scheduled one.
pub fn find_build_request_with_same_roots<'a>(
    store: &'a ModelStore,
    manifest: &Manifest,
    request: &BuildRequest,
    max_reuse_age: Option<Duration>,
) -> Option<&'a BuildRequest> {
    if !request.is_build() {
        return None;
    }
    let task = request.task?;
    let commit_set = store.commit_set(request.commit_set)?;
    // An age reaching before chrono's minimum date is no limit at all.
    let earliest_creation_time =
        max_reuse_age.and_then(|age| Utc::now().checked_sub_signed(age));

    let mut in_progress: Option<&BuildRequest> = None;
    for group in store.test_groups_for_task(task) {
        if group.hidden || group.id == request.test_group {
            continue;
        }
        for candidate in store.requests_in_group(group.id) {
            if !candidate.is_build() || candidate.id == request.id {
                continue;
            }
            if !(candidate.has_completed() || candidate.is_running() || candidate.is_scheduled()) {
                continue;
            }
            if !manifest.platforms_in_same_group(request.platform, candidate.platform) {
                continue;
            }
            let Some(candidate_set) = store.commit_set(candidate.commit_set) else {
                continue;
            };
            if !commit_set.equals_ignoring_root(candidate_set)
                || !candidate_set.are_all_roots_available(earliest_creation_time)
            {
                continue;
            }
            if candidate.has_completed() {
                return Some(candidate);
            }

            let better = match in_progress {
                None => true,
                Some(current) => {
                    let rank = |r: &BuildRequest| (!r.is_running(), r.created_at, r.id);
                    rank(candidate) < rank(current)
                }
            };
            if better {
                in_progress = Some(candidate);
            }
        }
    }
    in_progress
}
