//! Domain models for the build request syncer.

pub mod build_request;
pub mod commit_set;
pub mod manifest;
pub mod test_group;

// Re-export commonly used types
pub use build_request::{BuildRequest, BuildRequestStatus, BuildRequestUpdate, UpdateMap};
pub use commit_set::{Commit, CommitSet, UploadedFile};
pub use manifest::{Manifest, Platform, Repository, RepositoryGroup, Test, Triggerable};
pub use test_group::{RepetitionType, TestGroup};

/// Identifier used by the dashboard for every model object.
///
/// The dashboard serializes ids either as JSON numbers or as numeric strings,
/// so deserialization goes through [`de::id`].
pub type Id = u64;

/// Serde helpers for the dashboard's loosely typed JSON.
pub mod de {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};

    use super::Id;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(serde_json::Number),
        String(String),
    }

    fn parse_id(raw: NumberOrString) -> Option<Id> {
        match raw {
            NumberOrString::Number(n) => n.as_u64(),
            NumberOrString::String(s) => s.trim().parse().ok(),
        }
    }

    /// Parse an id from a JSON value such as `17`, `"17"` or `null`.
    pub fn id_from_value(value: &serde_json::Value) -> Option<Id> {
        match value {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn id<'de, D>(deserializer: D) -> Result<Id, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = NumberOrString::deserialize(deserializer)?;
        parse_id(raw).ok_or_else(|| serde::de::Error::custom("expected a numeric id"))
    }

    pub fn opt_id<'de, D>(deserializer: D) -> Result<Option<Id>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<NumberOrString>::deserialize(deserializer)?;
        Ok(raw.and_then(parse_id))
    }

    pub fn ids<'de, D>(deserializer: D) -> Result<Vec<Id>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Vec<NumberOrString>>::deserialize(deserializer)?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .filter_map(parse_id)
            .collect())
    }

    /// Order values arrive as numbers or strings and may be negative.
    pub fn order<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => n
                .as_i64()
                .ok_or_else(|| serde::de::Error::custom("order must be an integer")),
            NumberOrString::String(s) => s
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom("order must be an integer")),
        }
    }

    /// Timestamps are epoch milliseconds.
    pub fn opt_millis<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Number>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|n| n.as_f64())
            .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()))
    }

    pub fn millis<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        opt_millis(deserializer).map(|t| t.unwrap_or_default())
    }

}
