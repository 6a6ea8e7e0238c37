//! Adapter between build requests and one buildbot builder.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::models::{BuildRequest, CommitSet, Id, Manifest};
use crate::services::remote::RemoteApi;
use crate::store::ModelStore;

use super::build_entry::{BuildResult, BuildbotBuildEntry};
use super::config::{PropertyTemplate, SyncConfig, SyncConfigError, SyncerConfig, parse_sync_config};

/// Outcome of looking for a free worker on a builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSlot {
    /// Every worker is busy or already received a request this cycle.
    Unavailable,
    /// The builder is idle and buildbot picks the worker.
    AnyWorker,
    Worker(String),
}

/// Builders and workers that received a force build during the current cycle.
///
/// Shared by every syncer so two syncers driving the same builder cannot
/// both hand it a request before buildbot reports either one as pending.
#[derive(Debug, Default)]
pub struct WorkerReservations {
    by_builder: HashMap<String, HashSet<Option<String>>>,
}

impl WorkerReservations {
    pub fn clear(&mut self) {
        self.by_builder.clear();
    }

    pub fn reserve(&mut self, builder: &str, worker: Option<&str>) {
        self.by_builder
            .entry(builder.to_string())
            .or_default()
            .insert(worker.map(str::to_string));
    }

    pub fn has_any(&self, builder: &str) -> bool {
        self.by_builder
            .get(builder)
            .is_some_and(|workers| !workers.is_empty())
    }

    pub fn is_reserved(&self, builder: &str, worker: &str) -> bool {
        self.by_builder
            .get(builder)
            .is_some_and(|workers| workers.contains(&Some(worker.to_string())))
    }
}

/// One (builder, platform, test) configuration and the builder's last polled state.
pub struct BuildbotSyncer {
    remote: Arc<dyn RemoteApi>,
    config: SyncerConfig,
    platform_id: Id,
    test_id: Option<Id>,
    builder_id: Option<u64>,
    entry_list: Vec<BuildbotBuildEntry>,
    last_completed_result: Option<BuildResult>,
}

impl BuildbotSyncer {
    /// Resolve `config` against the manifest.
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        config: SyncerConfig,
        manifest: &Manifest,
    ) -> Result<Self, SyncConfigError> {
        let platform_id = manifest
            .find_platform_by_name(&config.platform)
            .map(|platform| platform.id)
            .ok_or_else(|| SyncConfigError::UnknownPlatform(config.platform.clone()))?;
        let test_id = match config.test_path() {
            Some(path) => Some(
                manifest
                    .find_test_by_path(path)
                    .map(|test| test.id)
                    .ok_or_else(|| SyncConfigError::UnknownTest(path.join(" > ")))?,
            ),
            None => None,
        };

        Ok(Self {
            remote,
            config,
            platform_id,
            test_id,
            builder_id: None,
            entry_list: Vec::new(),
            last_completed_result: None,
        })
    }

    /// Create one syncer per configuration entry.
    pub fn from_sync_config(
        remote: Arc<dyn RemoteApi>,
        sync_config: &SyncConfig,
        manifest: &Manifest,
    ) -> Result<Vec<Self>, SyncConfigError> {
        sync_config
            .syncers
            .iter()
            .map(|config| Self::new(remote.clone(), config.clone(), manifest))
            .collect()
    }

    /// Parse a raw configuration document and create its syncers.
    pub fn load_config(
        remote: Arc<dyn RemoteApi>,
        config: &Value,
        manifest: &Manifest,
    ) -> Result<Vec<Self>, SyncConfigError> {
        let sync_config = parse_sync_config(config)?;
        Self::from_sync_config(remote, &sync_config, manifest)
    }

    pub fn builder_name(&self) -> &str {
        &self.config.builder
    }

    pub fn config(&self) -> &SyncerConfig {
        &self.config
    }

    pub fn platform_id(&self) -> Id {
        self.platform_id
    }

    pub fn test_id(&self) -> Option<Id> {
        self.test_id
    }

    pub fn is_tester(&self) -> bool {
        self.test_id.is_some()
    }

    pub fn worker_property_name(&self) -> Option<&str> {
        self.config.worker_argument.as_deref()
    }

    pub fn build_request_property_name(&self) -> &str {
        &self.config.build_request_argument
    }

    pub fn builder_id(&self) -> Option<u64> {
        self.builder_id
    }

    pub fn set_builder_id(&mut self, builder_id: u64) {
        self.builder_id = Some(builder_id);
    }

    /// Builder plus what it runs, for logs and errors.
    pub fn label(&self) -> String {
        match self.config.test_path() {
            Some(test) => format!(
                "{} ({}, {})",
                self.config.builder,
                self.config.platform,
                test.join(" > ")
            ),
            None => format!("{} ({} builds)", self.config.builder, self.config.platform),
        }
    }

    pub fn entries(&self) -> &[BuildbotBuildEntry] {
        &self.entry_list
    }

    /// Whether `request` is a build request this syncer can run.
    pub fn matches_configuration(&self, request: &BuildRequest) -> bool {
        request.platform == self.platform_id && request.test == self.test_id
    }

    fn escaped_builder(&self) -> String {
        urlencoding::encode(&self.config.builder).into_owned()
    }

    pub fn path_for_pending_builds(&self) -> String {
        format!("/json/builders/{}/pendingBuilds", self.escaped_builder())
    }

    pub fn path_for_recent_builds(&self, count: u32) -> String {
        let selects: Vec<String> = (1..=count).map(|i| format!("select=-{}", i)).collect();
        format!(
            "/json/builders/{}/builds/?{}",
            self.escaped_builder(),
            selects.join("&")
        )
    }

    pub fn path_for_force_build(&self) -> String {
        format!("/builders/{}/force", self.escaped_builder())
    }

    /// Web page of the builder.
    pub fn url(&self) -> String {
        match self.builder_id {
            Some(id) => self.remote.url(&format!("/#/builders/{}", id)),
            None => self.remote.url(&format!("/builders/{}/", self.escaped_builder())),
        }
    }

    pub fn url_for_build_number(&self, number: u64) -> String {
        match self.builder_id {
            Some(id) => self
                .remote
                .url(&format!("/#/builders/{}/builds/{}", id, number)),
            None => self
                .remote
                .url(&format!("/builders/{}/builds/{}", self.escaped_builder(), number)),
        }
    }

    /// Ids of the build requests queued on the builder.
    pub async fn fetch_pending_requests(&self) -> SyncResult<Vec<Id>> {
        let content = self
            .remote
            .get_json(&self.path_for_pending_builds())
            .await?;
        let mut ids = Vec::new();
        for raw in content.as_array().map(Vec::as_slice).unwrap_or_default() {
            if let Some(id) = BuildbotBuildEntry::new(self, raw)?.build_request_id() {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Refresh the entry list from pending builds and the `lookback` most recent builds.
    pub async fn pull_buildbot(&mut self, lookback: u32) -> SyncResult<&[BuildbotBuildEntry]> {
        let pending = self
            .remote
            .get_json(&self.path_for_pending_builds())
            .await?;
        let mut pending_entries = Vec::new();
        for raw in pending.as_array().map(Vec::as_slice).unwrap_or_default() {
            pending_entries.push(BuildbotBuildEntry::new(self, raw)?);
        }

        let recent_entries = self.pull_recent_builds(lookback).await?;
        self.last_completed_result = recent_entries
            .iter()
            .find(|entry| entry.has_finished())
            .and_then(BuildbotBuildEntry::result);

        // Recent builds supersede pending ones for the same request.
        let mut by_request: BTreeMap<Id, BuildbotBuildEntry> = BTreeMap::new();
        let mut anonymous = Vec::new();
        for entry in pending_entries.into_iter().chain(recent_entries) {
            match entry.build_request_id() {
                Some(id) => {
                    by_request.insert(id, entry);
                }
                None => anonymous.push(entry),
            }
        }

        self.entry_list = by_request.into_values().chain(anonymous).collect();
        debug!(
            "Pulled {} entries from builder {}",
            self.entry_list.len(),
            self.config.builder
        );
        Ok(&self.entry_list)
    }

    /// Most recent builds first.
    async fn pull_recent_builds(&self, count: u32) -> SyncResult<Vec<BuildbotBuildEntry>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let content = self
            .remote
            .get_json(&self.path_for_recent_builds(count))
            .await?;

        let mut entries = Vec::new();
        for index in 1..=count {
            let Some(raw) = content.get(format!("-{}", index)) else {
                continue;
            };
            if raw.is_null() || raw.get("error").is_some() {
                continue;
            }
            entries.push(BuildbotBuildEntry::new(self, raw)?);
        }
        Ok(entries)
    }

    /// Whether the most recent finished build succeeded. True when none finished yet.
    pub fn last_completed_build_successful(&self) -> bool {
        self.last_completed_result
            .is_none_or(|result| result.is_successful())
    }

    /// Form fields for force-building `request` against `commit_set`.
    pub fn properties_for_build_request(
        &self,
        request: &BuildRequest,
        commit_set: &CommitSet,
    ) -> SyncResult<Vec<(String, String)>> {
        let mut properties = Vec::with_capacity(self.config.properties.len() + 1);
        for (name, template) in &self.config.properties {
            let value = match template {
                PropertyTemplate::Literal(value) => value.clone(),
                PropertyTemplate::Root(repository) => commit_set
                    .revision_for_repository(repository)
                    .map(str::to_string)
                    .ok_or_else(|| SyncError::MissingRepository {
                        request: request.id,
                        repository: repository.clone(),
                    })?,
                PropertyTemplate::RootsExcluding(excluded) => {
                    serde_json::to_string(&commit_set.revisions_excluding(excluded))?
                }
            };
            properties.push((name.clone(), value));
        }
        properties.push((
            self.config.build_request_argument.clone(),
            request.id.to_string(),
        ));
        Ok(properties)
    }

    /// Pick a worker for a new request in `test_group`, or report the builder busy.
    ///
    /// Pending builds block their worker. Running builds block their worker
    /// unless they belong to the same test group.
    pub fn available_worker(
        &self,
        test_group: Id,
        requested_worker: Option<&str>,
        reservations: &WorkerReservations,
        store: &ModelStore,
    ) -> WorkerSlot {
        let builder = self.builder_name();
        let mut has_blocking_build_without_worker = false;
        let mut used_workers: HashSet<&str> = HashSet::new();
        let mut blocked = false;

        for entry in &self.entry_list {
            let mut prevents_new_request = entry.is_pending();
            if entry.is_in_progress() {
                let same_group = entry
                    .build_request_id()
                    .and_then(|id| store.build_request(id))
                    .is_some_and(|request| request.test_group == test_group);
                if !same_group {
                    prevents_new_request = true;
                }
            }
            if !prevents_new_request {
                continue;
            }
            blocked = true;
            match entry.worker_name() {
                Some(worker) => {
                    used_workers.insert(worker);
                }
                None => has_blocking_build_without_worker = true,
            }
        }

        let is_free = |worker: &str| {
            !used_workers.contains(worker) && !reservations.is_reserved(builder, worker)
        };

        match self.config.worker_list {
            Some(ref workers) if !has_blocking_build_without_worker => {
                if let Some(worker) = requested_worker {
                    return if is_free(worker) {
                        WorkerSlot::Worker(worker.to_string())
                    } else {
                        WorkerSlot::Unavailable
                    };
                }
                workers
                    .iter()
                    .find(|worker| is_free(worker.as_str()))
                    .map(|worker| WorkerSlot::Worker(worker.clone()))
                    .unwrap_or(WorkerSlot::Unavailable)
            }
            _ => {
                if blocked || reservations.has_any(builder) {
                    WorkerSlot::Unavailable
                } else {
                    WorkerSlot::AnyWorker
                }
            }
        }
    }

    /// POST a force build for `request`, pinned to `worker` when given.
    pub async fn schedule_request(
        &self,
        request: &BuildRequest,
        commit_set: &CommitSet,
        worker: Option<&str>,
    ) -> SyncResult<()> {
        let mut properties = self.properties_for_build_request(request, commit_set)?;
        if let (Some(property), Some(worker)) = (self.worker_property_name(), worker) {
            properties.push((property.to_string(), worker.to_string()));
        }
        self.remote
            .post_form(&self.path_for_force_build(), &properties)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for BuildbotSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildbotSyncer")
            .field("builder", &self.config.builder)
            .field("platform", &self.config.platform)
            .field("test", &self.config.test_path())
            .finish()
    }
}
