//! Dashboard manifest: platforms, tests, repositories and triggerables.
//!
//! The manifest maps the names used in the sync configuration (platform
//! names, test paths, repository names) to the ids used by build requests.

use std::collections::HashMap;

use serde::Deserialize;

use super::{Id, de};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub id: Id,
    pub name: String,
    /// Platforms in the same group can reuse each other's roots.
    pub group: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub id: Id,
    pub name: String,
    pub parent: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryGroup {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub accepts_roots: bool,
    pub repositories: Vec<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triggerable {
    pub id: Id,
    pub name: String,
    pub repository_groups: Vec<RepositoryGroup>,
}

impl Triggerable {
    pub fn accepts_repository_group(&self, group_id: Id) -> bool {
        self.repository_groups.iter().any(|group| group.id == group_id)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlatform {
    name: String,
    #[serde(default, deserialize_with = "de::opt_id")]
    group: Option<Id>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTest {
    name: String,
    #[serde(default, deserialize_with = "de::opt_id")]
    parent_id: Option<Id>,
}

#[derive(Deserialize)]
struct RawRepository {
    name: String,
}

#[derive(Deserialize)]
struct RawGroupRepository {
    #[serde(deserialize_with = "de::id")]
    repository: Id,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepositoryGroup {
    #[serde(deserialize_with = "de::id")]
    id: Id,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    accepts_custom_roots: bool,
    #[serde(default)]
    repositories: Vec<RawGroupRepository>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTriggerable {
    name: String,
    #[serde(default)]
    repository_groups: Vec<RawRepositoryGroup>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    platforms: HashMap<String, RawPlatform>,
    #[serde(default)]
    tests: HashMap<String, RawTest>,
    #[serde(default)]
    repositories: HashMap<String, RawRepository>,
    #[serde(default)]
    triggerables: HashMap<String, RawTriggerable>,
}

fn parse_key(key: &str) -> Result<Id, serde_json::Error> {
    key.trim()
        .parse()
        .map_err(|_| serde::de::Error::custom(format!("manifest key '{}' is not an id", key)))
}

/// Read-only lookup tables built from `/data/manifest.json`.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    platforms: HashMap<Id, Platform>,
    tests: HashMap<Id, Test>,
    repositories: HashMap<Id, Repository>,
    triggerables: HashMap<Id, Triggerable>,
}

impl Manifest {
    /// Build a manifest from the dashboard's JSON.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw = RawManifest::deserialize(value)?;
        let mut manifest = Manifest::default();

        for (key, platform) in raw.platforms {
            let id = parse_key(&key)?;
            manifest.platforms.insert(
                id,
                Platform {
                    id,
                    name: platform.name,
                    group: platform.group,
                },
            );
        }

        for (key, test) in raw.tests {
            let id = parse_key(&key)?;
            manifest.tests.insert(
                id,
                Test {
                    id,
                    name: test.name,
                    parent: test.parent_id,
                },
            );
        }

        for (key, repository) in raw.repositories {
            let id = parse_key(&key)?;
            manifest.repositories.insert(
                id,
                Repository {
                    id,
                    name: repository.name,
                },
            );
        }

        for (key, triggerable) in raw.triggerables {
            let id = parse_key(&key)?;
            let repository_groups = triggerable
                .repository_groups
                .into_iter()
                .map(|group| RepositoryGroup {
                    id: group.id,
                    name: group.name,
                    description: group.description,
                    accepts_roots: group.accepts_custom_roots,
                    repositories: group.repositories.into_iter().map(|r| r.repository).collect(),
                })
                .collect();
            manifest.triggerables.insert(
                id,
                Triggerable {
                    id,
                    name: triggerable.name,
                    repository_groups,
                },
            );
        }

        Ok(manifest)
    }

    pub fn platform(&self, id: Id) -> Option<&Platform> {
        self.platforms.get(&id)
    }

    pub fn find_platform_by_name(&self, name: &str) -> Option<&Platform> {
        self.platforms.values().find(|platform| platform.name == name)
    }

    /// True when both platforms are the same or belong to the same platform group.
    pub fn platforms_in_same_group(&self, a: Id, b: Id) -> bool {
        if a == b {
            return true;
        }
        match (self.platform(a), self.platform(b)) {
            (Some(pa), Some(pb)) => pa.group.is_some() && pa.group == pb.group,
            _ => false,
        }
    }

    pub fn test(&self, id: Id) -> Option<&Test> {
        self.tests.get(&id)
    }

    /// Find a test by its path from the root, e.g. `["Speedometer", "Total"]`.
    pub fn find_test_by_path(&self, path: &[String]) -> Option<&Test> {
        let mut parent: Option<Id> = None;
        let mut found = None;
        for name in path {
            let test = self
                .tests
                .values()
                .find(|test| test.parent == parent && &test.name == name)?;
            parent = Some(test.id);
            found = Some(test);
        }
        found
    }

    /// Test names from the root down to `id`.
    pub fn test_path(&self, id: Id) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = self.tests.get(&id);
        while let Some(test) = current {
            path.push(test.name.clone());
            current = test.parent.and_then(|parent| self.tests.get(&parent));
            if path.len() > self.tests.len() {
                break;
            }
        }
        path.reverse();
        path
    }

    pub fn test_full_name(&self, id: Id) -> String {
        self.test_path(id).join(" > ")
    }

    pub fn repository(&self, id: Id) -> Option<&Repository> {
        self.repositories.get(&id)
    }

    pub fn find_repository_by_name(&self, name: &str) -> Option<&Repository> {
        self.repositories.values().find(|repo| repo.name == name)
    }

    pub fn triggerable(&self, id: Id) -> Option<&Triggerable> {
        self.triggerables.get(&id)
    }

    pub fn find_triggerable_by_name(&self, name: &str) -> Option<&Triggerable> {
        self.triggerables.values().find(|t| t.name == name)
    }

    pub fn repository_group(&self, id: Id) -> Option<&RepositoryGroup> {
        self.triggerables
            .values()
            .flat_map(|t| t.repository_groups.iter())
            .find(|group| group.id == id)
    }
}
