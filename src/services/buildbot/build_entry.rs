//! One build record reported by buildbot.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::models::{BuildRequest, BuildRequestStatus, Id, de};

use super::syncer::BuildbotSyncer;

/// Buildbot build result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResult {
    Success,
    Warnings,
    Failure,
    Skipped,
    Exception,
    Retry,
    Cancelled,
}

impl BuildResult {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Warnings),
            2 => Some(Self::Failure),
            3 => Some(Self::Skipped),
            4 => Some(Self::Exception),
            5 => Some(Self::Retry),
            6 => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Success | Self::Warnings)
    }

    /// Results that mean the build request cannot produce results anymore.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Exception | Self::Cancelled)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuild {
    builder_name: String,
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    current_step: Option<Value>,
    #[serde(default)]
    results: Option<i64>,
    #[serde(default)]
    text: Option<Vec<String>>,
    #[serde(default)]
    slave: Option<String>,
    #[serde(default)]
    properties: Vec<Value>,
}

/// Build record parsed from buildbot's JSON, either pending or started.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildbotBuildEntry {
    worker_name: Option<String>,
    build_request_id: Option<Id>,
    build_number: Option<u64>,
    is_in_progress: bool,
    result: Option<BuildResult>,
    status_description: Option<String>,
    url: String,
}

impl BuildbotBuildEntry {
    /// Parse `raw` on behalf of `syncer`, whose property names locate the
    /// worker and build request id.
    pub fn new(syncer: &BuildbotSyncer, raw: &Value) -> SyncResult<Self> {
        let raw = RawBuild::deserialize(raw)?;
        if raw.builder_name != syncer.builder_name() {
            return Err(SyncError::BuilderMismatch {
                expected: syncer.builder_name().to_string(),
                actual: raw.builder_name,
            });
        }

        let mut worker_name = None;
        let mut build_request_id = None;
        for property in &raw.properties {
            let Some(tuple) = property.as_array() else {
                continue;
            };
            let (Some(name), Some(value)) = (tuple.first().and_then(Value::as_str), tuple.get(1))
            else {
                continue;
            };
            // First occurrence of each property wins.
            if Some(name) == syncer.worker_property_name() {
                if worker_name.is_none() {
                    worker_name = value.as_str().map(str::to_string);
                }
            } else if name == syncer.build_request_property_name() && build_request_id.is_none() {
                build_request_id = de::id_from_value(value);
            }
        }
        let worker_name = worker_name.or(raw.slave);

        let is_in_progress = raw.current_step.as_ref().is_some_and(|step| !step.is_null());

        let url = match raw.number {
            Some(number) => syncer.url_for_build_number(number),
            None => syncer.url(),
        };

        Ok(Self {
            worker_name,
            build_request_id,
            build_number: raw.number,
            is_in_progress,
            result: raw.results.and_then(BuildResult::from_code),
            status_description: raw.text.filter(|text| !text.is_empty()).map(|text| text.join(" ")),
            url,
        })
    }

    pub fn worker_name(&self) -> Option<&str> {
        self.worker_name.as_deref()
    }

    pub fn build_request_id(&self) -> Option<Id> {
        self.build_request_id
    }

    pub fn build_number(&self) -> Option<u64> {
        self.build_number
    }

    /// Queued on the builder but not started.
    pub fn is_pending(&self) -> bool {
        self.build_number.is_none()
    }

    pub fn is_in_progress(&self) -> bool {
        self.is_in_progress
    }

    pub fn has_finished(&self) -> bool {
        !self.is_pending() && !self.is_in_progress
    }

    pub fn result(&self) -> Option<BuildResult> {
        self.result
    }

    pub fn status_description(&self) -> Option<&str> {
        self.status_description.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// New status for `request` when buildbot has moved past what the
    /// dashboard knows, `None` when the dashboard is already up to date.
    pub fn build_request_status_if_update_is_needed(
        &self,
        request: &BuildRequest,
    ) -> Option<BuildRequestStatus> {
        if self.build_request_id != Some(request.id) {
            return None;
        }
        if self.is_pending() {
            if request.is_pending() {
                return Some(BuildRequestStatus::Scheduled);
            }
        } else if self.is_in_progress() {
            if !request.has_started() || request.is_scheduled() {
                return Some(BuildRequestStatus::Running);
            }
        } else if !request.has_finished() {
            if self.result.is_some_and(|result| result.is_failure()) {
                return Some(BuildRequestStatus::Failed);
            }
            return Some(BuildRequestStatus::FailedIfNotCompleted);
        }
        None
    }
}
