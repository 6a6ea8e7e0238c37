//! Build request orchestration for one triggerable.
//!
//! Each call to [`BuildbotTriggerable::sync_once`] runs one reconciliation
//! cycle:
//! 1. Fetch the triggerable's build requests and their test groups
//! 2. Validate each request against the configured syncers
//! 3. Poll every builder and derive status updates
//! 4. Pick the next request of every test group and force-build it
//! 5. Poll again and post the merged updates to the dashboard

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use futures_util::future::try_join_all;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::models::{
    BuildRequest, BuildRequestStatus, BuildRequestUpdate, Id, Manifest, RepetitionType, UpdateMap,
};
use crate::services::buildbot::config::{RepositoryGroupConfig, SyncConfig, SyncConfigError};
use crate::services::buildbot::{BuildbotSyncer, WorkerReservations, WorkerSlot};
use crate::services::remote::RemoteApi;
use crate::store::{self, ModelStore};

/// Credentials and reuse policy used by every cycle.
#[derive(Debug, Clone)]
pub struct TriggerableOptions {
    pub worker_name: String,
    pub worker_password: SecretString,
    /// Roots created longer ago than this are not reused. `None` allows any age.
    pub max_root_reuse_age: Option<Duration>,
}

/// What one sync cycle did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub cycle_id: String,
    /// Updates posted to the dashboard.
    pub updates: UpdateMap,
    /// Requests force-built on buildbot.
    pub scheduled: Vec<Id>,
    /// Build requests completed by reusing another request's roots.
    pub reused: Vec<Id>,
    /// Requests held back this cycle.
    pub deferred: Vec<Id>,
    /// Requests that failed validation.
    pub excluded: Vec<Id>,
}

/// Syncer and worker that ran a test group's requests of one kind.
#[derive(Debug, Default, Clone)]
struct Assignment {
    syncer: Option<usize>,
    worker: Option<String>,
}

#[derive(Debug, Default)]
struct GroupAssignments {
    build: Assignment,
    test: Assignment,
}

impl GroupAssignments {
    fn for_request(&self, request: &BuildRequest) -> &Assignment {
        if request.is_build() {
            &self.build
        } else {
            &self.test
        }
    }

    fn record(
        &mut self,
        group: Id,
        is_build: bool,
        syncer_index: usize,
        worker: Option<&str>,
        syncers: &[BuildbotSyncer],
    ) -> SyncResult<()> {
        let (role, assignment) = if is_build {
            ("build", &mut self.build)
        } else {
            ("test", &mut self.test)
        };

        if let Some(existing) = assignment.syncer
            && existing != syncer_index
        {
            return Err(SyncError::SyncerConflict {
                group,
                role,
                first: syncers[existing].label(),
                second: syncers[syncer_index].label(),
            });
        }
        assignment.syncer = Some(syncer_index);

        if let Some(worker) = worker {
            if let Some(ref existing) = assignment.worker
                && existing != worker
            {
                return Err(SyncError::WorkerConflict {
                    group,
                    role,
                    first: existing.clone(),
                    second: worker.to_string(),
                });
            }
            assignment.worker = Some(worker.to_string());
        }
        Ok(())
    }
}

/// Syncs the build requests of one triggerable with buildbot.
pub struct BuildbotTriggerable {
    name: String,
    lookback_count: u32,
    repository_groups: Vec<RepositoryGroupConfig>,
    manifest: Manifest,
    app: Arc<dyn RemoteApi>,
    buildbot: Arc<dyn RemoteApi>,
    options: TriggerableOptions,
    syncers: Vec<BuildbotSyncer>,
    reservations: WorkerReservations,
    /// (platform, test) pairs already reported as unsupported.
    reported_unsupported: HashSet<(Id, Option<Id>)>,
}

impl BuildbotTriggerable {
    pub fn new(
        sync_config: SyncConfig,
        manifest: Manifest,
        app: Arc<dyn RemoteApi>,
        buildbot: Arc<dyn RemoteApi>,
        options: TriggerableOptions,
    ) -> Result<Self, SyncConfigError> {
        let syncers = BuildbotSyncer::from_sync_config(buildbot.clone(), &sync_config, &manifest)?;
        Ok(Self {
            name: sync_config.triggerable_name,
            lookback_count: sync_config.lookback_count,
            repository_groups: sync_config.repository_groups,
            manifest,
            app,
            buildbot,
            options,
            syncers,
            reservations: WorkerReservations::default(),
            reported_unsupported: HashSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn syncers(&self) -> &[BuildbotSyncer] {
        &self.syncers
    }

    /// Replace the manifest, e.g. after `update_triggerable` registered new groups.
    pub fn set_manifest(&mut self, manifest: Manifest) {
        self.manifest = manifest;
    }

    /// Resolve every syncer's builder id from `/api/v2/builders`.
    pub async fn init_syncers(&mut self) -> SyncResult<()> {
        let content = self.buildbot.get_json("/api/v2/builders").await?;
        let builder_ids: HashMap<&str, u64> = content
            .get("builders")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|builder| {
                Some((
                    builder.get("name")?.as_str()?,
                    builder.get("builderid")?.as_u64()?,
                ))
            })
            .collect();

        for syncer in &mut self.syncers {
            let id = builder_ids
                .get(syncer.builder_name())
                .copied()
                .ok_or_else(|| SyncError::UnknownBuilder(syncer.builder_name().to_string()))?;
            syncer.set_builder_id(id);
        }
        info!("Resolved {} builders", self.syncers.len());
        Ok(())
    }

    /// Publish the (test, platform) pairs and repository groups this triggerable serves.
    pub async fn update_triggerable(&self) -> SyncResult<()> {
        let mut seen = HashSet::new();
        let configurations: Vec<Value> = self
            .syncers
            .iter()
            .filter_map(|syncer| Some((syncer.test_id()?, syncer.platform_id())))
            .filter(|pair| seen.insert(*pair))
            .map(|(test, platform)| json!({"test": test, "platform": platform}))
            .collect();

        let configuration_count = configurations.len();

        let mut repository_groups = Vec::with_capacity(self.repository_groups.len());
        for group in &self.repository_groups {
            let mut repositories = Vec::with_capacity(group.repositories.len());
            for name in &group.repositories {
                let repository = self
                    .manifest
                    .find_repository_by_name(name)
                    .ok_or_else(|| SyncError::NotFound(format!("Repository '{}'", name)))?;
                repositories.push(json!({"repository": repository.id}));
            }
            repository_groups.push(json!({
                "name": group.name,
                "description": group.description,
                "acceptsRoots": group.accepts_roots,
                "repositories": repositories,
            }));
        }

        let body = json!({
            "workerName": self.options.worker_name,
            "workerPassword": self.options.worker_password.expose_secret(),
            "triggerable": self.name,
            "configurations": configurations,
            "repositoryGroups": repository_groups,
        });
        self.app
            .post_json_with_status("/api/update-triggerable/", &body)
            .await?;
        info!(
            "Updated triggerable {} ({} configurations, {} repository groups)",
            self.name,
            configuration_count,
            self.repository_groups.len()
        );
        Ok(())
    }

    /// Run one reconciliation cycle.
    pub async fn sync_once(&mut self) -> SyncResult<SyncReport> {
        let cycle_id = Uuid::now_v7();
        let span = info_span!("sync_cycle", cycle_id = %cycle_id, triggerable = %self.name);
        let mut report = self.run_cycle().instrument(span).await?;
        report.cycle_id = cycle_id.to_string();
        Ok(report)
    }

    async fn run_cycle(&mut self) -> SyncResult<SyncReport> {
        let triggerable_id = self
            .manifest
            .find_triggerable_by_name(&self.name)
            .map(|triggerable| triggerable.id)
            .ok_or_else(|| SyncError::NotFound(format!("Triggerable '{}'", self.name)))?;

        let mut store = ModelStore::new();
        let request_ids =
            store::fetch_for_triggerable(self.app.as_ref(), &mut store, &self.manifest, &self.name)
                .await?;
        info!("Found {} build requests", request_ids.len());

        let mut seen_groups = HashSet::new();
        let group_order: Vec<Id> = request_ids
            .iter()
            .filter_map(|id| store.build_request(*id))
            .map(|request| request.test_group)
            .filter(|group| seen_groups.insert(*group))
            .collect();
        store::fetch_test_groups(self.app.as_ref(), &mut store, &self.manifest, &group_order)
            .await?;

        let (valid, excluded) = self.validate_requests(&store, &request_ids, triggerable_id);
        let mut report = SyncReport {
            excluded,
            ..Default::default()
        };

        let (updates, assignments) = self
            .pull_buildbot_on_all_syncers(&store, &request_ids)
            .await?;

        let mut root_reuse_updates = UpdateMap::new();
        let mut fetched_tasks = HashSet::new();
        for group_id in &group_order {
            let Some(request) = next_request_in_group(&store, *group_id, &updates).cloned() else {
                continue;
            };
            if !valid.contains(&request.id) {
                continue;
            }

            if should_defer_sequential_test_request(&store, &request) {
                info!(
                    "Deferring build request {} until the previous commit set of test group {} is done",
                    request.id, group_id
                );
                report.deferred.push(request.id);
                continue;
            }

            if request.is_build() {
                if let Some(task) = request.task
                    && fetched_tasks.insert(task)
                {
                    store::fetch_test_groups_for_task(
                        self.app.as_ref(),
                        &mut store,
                        &self.manifest,
                        task,
                    )
                    .await?;
                }
                if let Some(reuse) = store::find_build_request_with_same_roots(
                    &store,
                    &self.manifest,
                    &request,
                    self.options.max_root_reuse_age,
                ) {
                    if !reuse.has_completed() {
                        info!(
                            "Build request {} waits for build request {} with the same roots",
                            request.id, reuse.id
                        );
                        report.deferred.push(request.id);
                        continue;
                    }
                    info!(
                        "Reusing roots of build request {} for build request {}",
                        reuse.id, request.id
                    );
                    root_reuse_updates.insert(
                        request.id,
                        BuildRequestUpdate {
                            status: BuildRequestStatus::Completed,
                            url: reuse.status_url.clone(),
                            status_description: reuse.status_description.clone(),
                            build_request_for_root_reuse: Some(reuse.id),
                        },
                    );
                    report.reused.push(request.id);
                    continue;
                }
            }

            let assignment = assignments
                .get(group_id)
                .map(|group| group.for_request(&request).clone())
                .unwrap_or_default();
            if self
                .schedule_request_if_worker_is_available(
                    &store,
                    &request,
                    assignment.syncer,
                    assignment.worker.as_deref(),
                )
                .await?
            {
                report.scheduled.push(request.id);
            }
        }

        // Force builds only show up on buildbot after the fact.
        let (poll_updates, _) = self
            .pull_buildbot_on_all_syncers(&store, &request_ids)
            .await?;
        let mut updates = root_reuse_updates;
        updates.extend(poll_updates);

        self.send_updates(&updates).await?;
        info!(
            "Sync cycle done: {} updates, {} scheduled, {} reused, {} deferred, {} excluded",
            updates.len(),
            report.scheduled.len(),
            report.reused.len(),
            report.deferred.len(),
            report.excluded.len()
        );
        report.updates = updates;
        Ok(report)
    }

    /// Split requests into schedulable ones and excluded ones.
    fn validate_requests(
        &mut self,
        store: &ModelStore,
        request_ids: &[Id],
        triggerable_id: Id,
    ) -> (HashSet<Id>, Vec<Id>) {
        let triggerable = self.manifest.triggerable(triggerable_id);
        let mut valid = HashSet::new();
        let mut excluded = Vec::new();

        for id in request_ids {
            let Some(request) = store.build_request(*id) else {
                continue;
            };

            if !self
                .syncers
                .iter()
                .any(|syncer| syncer.matches_configuration(request))
            {
                if self
                    .reported_unsupported
                    .insert((request.platform, request.test))
                {
                    let platform = self
                        .manifest
                        .platform(request.platform)
                        .map(|platform| platform.name.clone())
                        .unwrap_or_else(|| request.platform.to_string());
                    let test = request
                        .test
                        .map(|test| self.manifest.test_full_name(test))
                        .unwrap_or_else(|| "builds".to_string());
                    warn!("No syncer found for platform {} and {}", platform, test);
                }
                excluded.push(*id);
                continue;
            }

            if request.triggerable != Some(triggerable_id) {
                error!(
                    "Build request {} is for triggerable {:?}, not {}",
                    id, request.triggerable, self.name
                );
                excluded.push(*id);
                continue;
            }

            let accepted = request.repository_group.is_some_and(|group| {
                triggerable.is_some_and(|triggerable| triggerable.accepts_repository_group(group))
            });
            if !accepted {
                error!(
                    "Build request {} uses repository group {:?} which {} does not accept",
                    id, request.repository_group, self.name
                );
                excluded.push(*id);
                continue;
            }

            valid.insert(*id);
        }
        (valid, excluded)
    }

    /// Poll every builder and derive the updates buildbot's state implies.
    async fn pull_buildbot_on_all_syncers(
        &mut self,
        store: &ModelStore,
        request_ids: &[Id],
    ) -> SyncResult<(UpdateMap, HashMap<Id, GroupAssignments>)> {
        self.reservations.clear();
        let lookback = self.lookback_count;
        try_join_all(
            self.syncers
                .iter_mut()
                .map(|syncer| syncer.pull_buildbot(lookback)),
        )
        .await?;

        let own_requests: HashSet<Id> = request_ids.iter().copied().collect();
        let mut associated = HashSet::new();
        let mut updates = UpdateMap::new();
        let mut assignments: HashMap<Id, GroupAssignments> = HashMap::new();

        for (index, syncer) in self.syncers.iter().enumerate() {
            for entry in syncer.entries() {
                let Some(id) = entry.build_request_id() else {
                    continue;
                };
                if !own_requests.contains(&id) {
                    continue;
                }
                let Some(request) = store.build_request(id) else {
                    continue;
                };
                if !syncer.matches_configuration(request) {
                    continue;
                }
                associated.insert(id);

                assignments.entry(request.test_group).or_default().record(
                    request.test_group,
                    request.is_build(),
                    index,
                    entry.worker_name(),
                    &self.syncers,
                )?;

                let description = entry.status_description().map(str::to_string);
                if let Some(status) = entry.build_request_status_if_update_is_needed(request) {
                    info!(
                        "Updating the status of build request {} from {} to {}",
                        id, request.status, status
                    );
                    updates.insert(
                        id,
                        BuildRequestUpdate::status(status)
                            .with_url(entry.url())
                            .with_description(description),
                    );
                } else if request.status_url.is_none() {
                    info!(
                        "Setting the status URL of build request {} to {}",
                        id,
                        entry.url()
                    );
                    updates.insert(
                        id,
                        BuildRequestUpdate::status(request.status)
                            .with_url(entry.url())
                            .with_description(description),
                    );
                } else if !request.has_finished()
                    && description.is_some()
                    && request.status_description != description
                {
                    debug!(
                        "Updating the status description of build request {} to {:?}",
                        id, description
                    );
                    updates.insert(
                        id,
                        BuildRequestUpdate::status(request.status)
                            .with_url(entry.url())
                            .with_description(description),
                    );
                }
            }
        }

        for id in request_ids {
            let Some(request) = store.build_request(*id) else {
                continue;
            };
            if request.has_started() && !request.has_finished() && !associated.contains(id) {
                warn!(
                    "Build request {} is {} but buildbot no longer reports it",
                    id, request.status
                );
                updates.insert(
                    *id,
                    BuildRequestUpdate::status(BuildRequestStatus::FailedIfNotCompleted),
                );
            }
        }

        Ok((updates, assignments))
    }

    /// Schedule `request` on the group's syncer, or pick one for the group's first request.
    async fn schedule_request_if_worker_is_available(
        &mut self,
        store: &ModelStore,
        request: &BuildRequest,
        group_syncer: Option<usize>,
        group_worker: Option<&str>,
    ) -> SyncResult<bool> {
        let is_first_request = store
            .requests_in_group(request.test_group)
            .first()
            .is_some_and(|first| first.id == request.id)
            || request.order == 0;

        if !is_first_request {
            if let Some(index) = group_syncer {
                return self
                    .schedule_on_syncer(store, index, request, group_worker)
                    .await;
            }
            error!("Could not identify the syncer for build request {}", request.id);
        }

        for index in 0..self.syncers.len() {
            let syncer = &self.syncers[index];
            // A/B tests only go to queues whose last build succeeded.
            if syncer.is_tester() && request.order == 0 && !syncer.last_completed_build_successful()
            {
                debug!(
                    "Skipping {} for build request {}: last build failed",
                    syncer.label(),
                    request.id
                );
                continue;
            }
            if self.schedule_on_syncer(store, index, request, None).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn schedule_on_syncer(
        &mut self,
        store: &ModelStore,
        index: usize,
        request: &BuildRequest,
        requested_worker: Option<&str>,
    ) -> SyncResult<bool> {
        let syncer = &self.syncers[index];
        if !syncer.matches_configuration(request) {
            return Ok(false);
        }

        let worker = match syncer.available_worker(
            request.test_group,
            requested_worker,
            &self.reservations,
            store,
        ) {
            WorkerSlot::Unavailable => {
                debug!("{} has no free worker for build request {}", syncer.label(), request.id);
                return Ok(false);
            }
            WorkerSlot::AnyWorker => None,
            WorkerSlot::Worker(worker) => Some(worker),
        };

        let commit_set = store.commit_set_for(request)?;
        self.reservations
            .reserve(syncer.builder_name(), worker.as_deref());
        info!(
            "Scheduling build request {} on {} (worker: {})",
            request.id,
            syncer.label(),
            worker.as_deref().unwrap_or("any")
        );
        syncer
            .schedule_request(request, commit_set, worker.as_deref())
            .await?;
        Ok(true)
    }

    async fn send_updates(&self, updates: &UpdateMap) -> SyncResult<()> {
        let path = format!("/api/build-requests/{}", urlencoding::encode(&self.name));
        let body = json!({
            "workerName": self.options.worker_name,
            "workerPassword": self.options.worker_password.expose_secret(),
            "buildRequestUpdates": updates,
        });
        self.app.post_json_with_status(&path, &body).await?;
        Ok(())
    }
}

/// The request of a group to schedule next, if any.
///
/// A scheduled request blocks the group, and so does a build that has not
/// completed, since tests need its roots.
fn next_request_in_group<'a>(
    store: &'a ModelStore,
    group_id: Id,
    updates: &UpdateMap,
) -> Option<&'a BuildRequest> {
    for request in store.requests_in_group(group_id) {
        let update = updates.get(&request.id);
        if request.is_scheduled()
            || update.is_some_and(|update| update.status == BuildRequestStatus::Scheduled)
        {
            return None;
        }
        if request.is_pending() && update.is_none() {
            return Some(request);
        }
        if request.is_build() && !request.has_completed() {
            return None;
        }
    }
    None
}

/// Whether a sequential group should finish its previous commit set before
/// `request` starts a new one.
fn should_defer_sequential_test_request(store: &ModelStore, request: &BuildRequest) -> bool {
    if !request.is_test() {
        return false;
    }
    let Some(group) = store.test_group(request.test_group) else {
        return false;
    };
    if group.repetition_type != RepetitionType::Sequential || !group.may_need_more_requests {
        return false;
    }

    let requests = store.requests_in_group(group.id);
    let Some(previous) = requests
        .iter()
        .find(|candidate| candidate.order == request.order - 1)
    else {
        return false;
    };
    if !previous.is_test() || previous.commit_set == request.commit_set {
        return false;
    }

    let previous_set: Vec<&&BuildRequest> = requests
        .iter()
        .filter(|candidate| candidate.is_test() && candidate.commit_set == previous.commit_set)
        .collect();
    let has_unfinished = previous_set.iter().any(|candidate| !candidate.has_finished());
    let completed = previous_set
        .iter()
        .filter(|candidate| candidate.has_completed())
        .count();
    has_unfinished || completed < group.initial_repetition_count as usize
}
