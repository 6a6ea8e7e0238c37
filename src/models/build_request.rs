//! Build request domain models and the status update DTO.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Id, de};

/// Build request status as stored by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildRequestStatus {
    /// Waiting to be handed to buildbot.
    Pending,
    /// Force-built on buildbot and waiting in the builder's queue.
    Scheduled,
    /// Buildbot is running the build.
    Running,
    /// Results were reported.
    Completed,
    /// Buildbot reported a failure.
    Failed,
    /// Canceled by a user.
    Canceled,
    /// Fail the request unless results have already been reported.
    FailedIfNotCompleted,
}

impl BuildRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::FailedIfNotCompleted => "failedIfNotCompleted",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::FailedIfNotCompleted
        )
    }
}

impl std::fmt::Display for BuildRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One schedulable unit of buildbot work, bound to a commit set.
///
/// Build-type requests carry no test and use negative orders; test requests
/// are ordered from zero within their group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(deserialize_with = "de::id")]
    pub id: Id,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub triggerable: Option<Id>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub repository_group: Option<Id>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub task: Option<Id>,
    #[serde(deserialize_with = "de::id")]
    pub test_group: Id,
    #[serde(deserialize_with = "de::id")]
    pub platform: Id,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub test: Option<Id>,
    #[serde(deserialize_with = "de::order")]
    pub order: i64,
    #[serde(deserialize_with = "de::id")]
    pub commit_set: Id,
    pub status: BuildRequestStatus,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub status_description: Option<String>,
    #[serde(default, deserialize_with = "de::millis")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub build_request_for_root_reuse: Option<Id>,
}

impl BuildRequest {
    pub fn is_build(&self) -> bool {
        self.test.is_none()
    }

    pub fn is_test(&self) -> bool {
        self.test.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.status == BuildRequestStatus::Pending
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == BuildRequestStatus::Scheduled
    }

    pub fn is_running(&self) -> bool {
        self.status == BuildRequestStatus::Running
    }

    pub fn has_started(&self) -> bool {
        self.status != BuildRequestStatus::Pending
    }

    pub fn has_finished(&self) -> bool {
        self.status.is_finished()
    }

    pub fn has_completed(&self) -> bool {
        self.status == BuildRequestStatus::Completed
    }
}

/// Partial status patch sent back to the dashboard for one build request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequestUpdate {
    pub status: BuildRequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_request_for_root_reuse: Option<Id>,
}

impl BuildRequestUpdate {
    pub fn status(status: BuildRequestStatus) -> Self {
        Self {
            status,
            url: None,
            status_description: None,
            build_request_for_root_reuse: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.status_description = description;
        self
    }
}

/// Pending updates keyed by build request id, flushed once per sync cycle.
pub type UpdateMap = BTreeMap<Id, BuildRequestUpdate>;
