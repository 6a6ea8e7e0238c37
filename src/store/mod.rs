//! Per-cycle cache of dashboard models.
//!
//! A fresh [`ModelStore`] is filled from API payloads at the start of every
//! sync cycle and dropped at its end. Nothing in it is mutated except by
//! ingesting another server snapshot.

pub mod queries;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::models::{BuildRequest, Commit, CommitSet, Id, Manifest, TestGroup, UploadedFile, de};

pub use queries::{
    fetch_for_triggerable, fetch_manifest, fetch_test_groups, fetch_test_groups_for_task,
    find_build_request_with_same_roots,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUploadedFile {
    #[serde(deserialize_with = "de::id")]
    id: Id,
    #[serde(default)]
    filename: String,
    #[serde(default, deserialize_with = "de::millis")]
    created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "de::opt_millis")]
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawCommit {
    #[serde(deserialize_with = "de::id")]
    id: Id,
    #[serde(deserialize_with = "de::id")]
    repository: Id,
    revision: String,
    #[serde(default, deserialize_with = "de::opt_millis")]
    time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawRevisionItem {
    #[serde(deserialize_with = "de::id")]
    commit: Id,
    #[serde(default, deserialize_with = "de::opt_id")]
    patch: Option<Id>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommitSet {
    #[serde(deserialize_with = "de::id")]
    id: Id,
    #[serde(default)]
    revision_items: Vec<RawRevisionItem>,
    #[serde(default, deserialize_with = "de::ids")]
    custom_roots: Vec<Id>,
    #[serde(default, deserialize_with = "de::ids")]
    all_roots: Vec<Id>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    build_requests: Vec<BuildRequest>,
    #[serde(default)]
    test_groups: Vec<TestGroup>,
    #[serde(default)]
    commit_sets: Vec<RawCommitSet>,
    #[serde(default)]
    commits: Vec<RawCommit>,
    #[serde(default)]
    uploaded_files: Vec<RawUploadedFile>,
}

/// Ids found in one ingested payload, in payload order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub build_requests: Vec<Id>,
    pub test_groups: Vec<Id>,
}

/// Build requests, test groups and commit sets known during one sync cycle.
#[derive(Debug, Default)]
pub struct ModelStore {
    build_requests: HashMap<Id, BuildRequest>,
    test_groups: HashMap<Id, TestGroup>,
    commit_sets: HashMap<Id, CommitSet>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every model found in an API payload, replacing older copies.
    pub fn ingest(&mut self, payload: &Value, manifest: &Manifest) -> SyncResult<Ingested> {
        let payload = Payload::deserialize(payload)?;

        let files: HashMap<Id, UploadedFile> = payload
            .uploaded_files
            .into_iter()
            .map(|file| {
                (
                    file.id,
                    UploadedFile {
                        id: file.id,
                        filename: file.filename,
                        created_at: file.created_at,
                        deleted_at: file.deleted_at,
                    },
                )
            })
            .collect();
        let commits: HashMap<Id, RawCommit> = payload
            .commits
            .into_iter()
            .map(|commit| (commit.id, commit))
            .collect();

        for raw in payload.commit_sets {
            let commit_set = Self::build_commit_set(raw, &commits, &files, manifest)?;
            self.commit_sets.insert(commit_set.id, commit_set);
        }

        let mut ingested = Ingested::default();
        for group in payload.test_groups {
            ingested.test_groups.push(group.id);
            self.test_groups.insert(group.id, group);
        }
        for request in payload.build_requests {
            ingested.build_requests.push(request.id);
            self.build_requests.insert(request.id, request);
        }
        Ok(ingested)
    }

    fn build_commit_set(
        raw: RawCommitSet,
        commits: &HashMap<Id, RawCommit>,
        files: &HashMap<Id, UploadedFile>,
        manifest: &Manifest,
    ) -> SyncResult<CommitSet> {
        let find_file = |id: &Id| {
            files
                .get(id)
                .cloned()
                .ok_or_else(|| SyncError::NotFound(format!("Uploaded file {}", id)))
        };

        let mut set_commits = Vec::with_capacity(raw.revision_items.len());
        for item in raw.revision_items {
            let commit = commits
                .get(&item.commit)
                .ok_or_else(|| SyncError::NotFound(format!("Commit {}", item.commit)))?;
            let repository = manifest
                .repository(commit.repository)
                .ok_or_else(|| SyncError::NotFound(format!("Repository {}", commit.repository)))?;
            set_commits.push(Commit {
                id: commit.id,
                repository: commit.repository,
                repository_name: repository.name.clone(),
                revision: commit.revision.clone(),
                time: commit.time,
                patch: item.patch,
            });
        }
        set_commits.sort_by(|a, b| a.repository_name.cmp(&b.repository_name));

        Ok(CommitSet {
            id: raw.id,
            commits: set_commits,
            custom_roots: raw.custom_roots.iter().map(find_file).collect::<SyncResult<_>>()?,
            all_roots: raw.all_roots.iter().map(find_file).collect::<SyncResult<_>>()?,
        })
    }

    pub fn build_request(&self, id: Id) -> Option<&BuildRequest> {
        self.build_requests.get(&id)
    }

    pub fn test_group(&self, id: Id) -> Option<&TestGroup> {
        self.test_groups.get(&id)
    }

    pub fn commit_set(&self, id: Id) -> Option<&CommitSet> {
        self.commit_sets.get(&id)
    }

    /// Commit set of `request`, which must have been ingested alongside it.
    pub fn commit_set_for(&self, request: &BuildRequest) -> SyncResult<&CommitSet> {
        self.commit_set(request.commit_set)
            .ok_or_else(|| SyncError::NotFound(format!("Commit set {}", request.commit_set)))
    }

    /// Requests of a test group ordered by `order`.
    pub fn requests_in_group(&self, group_id: Id) -> Vec<&BuildRequest> {
        let mut requests: Vec<&BuildRequest> = match self.test_groups.get(&group_id) {
            Some(group) if !group.build_requests.is_empty() => group
                .build_requests
                .iter()
                .filter_map(|id| self.build_requests.get(id))
                .collect(),
            _ => self
                .build_requests
                .values()
                .filter(|request| request.test_group == group_id)
                .collect(),
        };
        requests.sort_by_key(|request| (request.order, request.id));
        requests
    }

    /// Test groups of an analysis task, oldest first.
    pub fn test_groups_for_task(&self, task: Id) -> Vec<&TestGroup> {
        let mut groups: Vec<&TestGroup> = self
            .test_groups
            .values()
            .filter(|group| group.task == Some(task))
            .collect();
        groups.sort_by_key(|group| (group.created_at, group.id));
        groups
    }
}
