//! Commit sets: the repository revisions and roots a build request runs against.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Id;

/// A file uploaded to the dashboard, either a custom root or a built root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: Id,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UploadedFile {
    pub fn is_available(&self, earliest_creation_time: Option<DateTime<Utc>>) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        match earliest_creation_time {
            Some(earliest) => self.created_at >= earliest,
            None => true,
        }
    }
}

/// One repository revision inside a commit set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: Id,
    pub repository: Id,
    pub repository_name: String,
    pub revision: String,
    pub time: Option<DateTime<Utc>>,
    pub patch: Option<Id>,
}

/// Entry of the `rootsExcluding` property map posted to buildbot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionInfo {
    pub id: Id,
    pub time: i64,
    pub repository: String,
    pub revision: String,
}

/// A combination of repository revisions plus optional uploaded roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSet {
    pub id: Id,
    /// Commits ordered by repository name.
    pub commits: Vec<Commit>,
    /// Roots supplied by the user as inputs.
    pub custom_roots: Vec<UploadedFile>,
    /// Every root attached to the set, including roots produced by builds.
    pub all_roots: Vec<UploadedFile>,
}

impl CommitSet {
    pub fn commit_for_repository(&self, repository_name: &str) -> Option<&Commit> {
        self.commits
            .iter()
            .find(|commit| commit.repository_name == repository_name)
    }

    pub fn revision_for_repository(&self, repository_name: &str) -> Option<&str> {
        self.commit_for_repository(repository_name)
            .map(|commit| commit.revision.as_str())
    }

    /// Revision info for every repository not named in `excluded`.
    pub fn revisions_excluding(
        &self,
        excluded: &[String],
    ) -> std::collections::BTreeMap<String, RevisionInfo> {
        self.commits
            .iter()
            .filter(|commit| !excluded.contains(&commit.repository_name))
            .map(|commit| {
                (
                    commit.repository_name.clone(),
                    RevisionInfo {
                        id: commit.id,
                        time: commit.time.map(|t| t.timestamp_millis()).unwrap_or(0),
                        repository: commit.repository_name.clone(),
                        revision: commit.revision.clone(),
                    },
                )
            })
            .collect()
    }

    /// Same revisions, patches and custom roots; roots produced by builds are ignored.
    pub fn equals_ignoring_root(&self, other: &CommitSet) -> bool {
        if self.commits.len() != other.commits.len() {
            return false;
        }
        let same_commits = self.commits.iter().all(|commit| {
            other
                .commit_for_repository(&commit.repository_name)
                .is_some_and(|theirs| {
                    theirs.revision == commit.revision && theirs.patch == commit.patch
                })
        });
        if !same_commits {
            return false;
        }

        let mut ours: Vec<Id> = self.custom_roots.iter().map(|f| f.id).collect();
        let mut theirs: Vec<Id> = other.custom_roots.iter().map(|f| f.id).collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        ours == theirs
    }

    pub fn are_all_roots_available(&self, earliest_creation_time: Option<DateTime<Utc>>) -> bool {
        self.all_roots
            .iter()
            .all(|root| root.is_available(earliest_creation_time))
    }
}
