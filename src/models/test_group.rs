//! Test group model.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{Id, de};

/// How repetitions of a test group are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepetitionType {
    /// Commit sets take turns; requests can be queued back to back.
    #[default]
    #[serde(alias = "parallel")]
    Alternating,
    /// All repetitions of one commit set run before the next commit set.
    Sequential,
}

impl RepetitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alternating => "alternating",
            Self::Sequential => "sequential",
        }
    }
}

impl std::fmt::Display for RepetitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered collection of build requests sharing an analysis task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestGroup {
    #[serde(deserialize_with = "de::id")]
    pub id: Id,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub task: Option<Id>,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de::millis")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub may_need_more_requests: bool,
    #[serde(default = "default_repetition_count")]
    pub initial_repetition_count: u32,
    #[serde(default)]
    pub repetition_type: RepetitionType,
    /// Every request of the group, in order.
    #[serde(default, deserialize_with = "de::ids")]
    pub build_requests: Vec<Id>,
}

fn default_repetition_count() -> u32 {
    1
}
