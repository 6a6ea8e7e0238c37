//! Layered sync configuration.
//!
//! A configuration file names the triggerable, the repository groups it
//! accepts, and one entry per (builder, platform, test) the syncer drives.
//! Each entry is resolved by merging, in order, the top-level defaults,
//! `shared`, the entry itself, `types[entry.type]` and
//! `builders[entry.builder]`; later layers override earlier ones and
//! `properties` merge key by key.
//!
//! ```json
//! {
//!     "triggerableName": "build-webkit-ios",
//!     "buildRequestArgument": "build_request_id",
//!     "workerArgument": "slavename",
//!     "shared": {"properties": {"roots_dict": {"rootsExcluding": ["iOS"]}}},
//!     "types": {"speedometer": {"test": ["Speedometer"], "properties": {"test_name": "speedometer"}}},
//!     "builders": {"iPhone-bench": {"builder": "ABTest-iPhone-RunBenchmark-Tests"}},
//!     "configurations": [{"type": "speedometer", "builder": "iPhone-bench", "platform": "iPhone"}]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde_json::{Map, Value};

/// Default number of recent builds inspected per builder.
pub const DEFAULT_LOOKBACK_COUNT: u32 = 2;

/// Value of one property posted to buildbot's force-build form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyTemplate {
    /// Posted verbatim.
    Literal(String),
    /// Revision of the named repository in the request's commit set.
    Root(String),
    /// JSON map of every repository in the commit set except the listed ones.
    RootsExcluding(Vec<String>),
}

/// Whether a syncer builds roots or runs tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncerRole {
    Tester { test: Vec<String> },
    Builder,
}

/// Fully merged configuration for one syncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerConfig {
    pub builder: String,
    pub platform: String,
    pub role: SyncerRole,
    pub properties: BTreeMap<String, PropertyTemplate>,
    pub build_request_argument: String,
    pub worker_argument: Option<String>,
    pub worker_list: Option<Vec<String>>,
}

impl SyncerConfig {
    pub fn test_path(&self) -> Option<&[String]> {
        match self.role {
            SyncerRole::Tester { ref test } => Some(test),
            SyncerRole::Builder => None,
        }
    }
}

/// Repository group published to the dashboard by `update_triggerable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryGroupConfig {
    pub name: String,
    pub description: Option<String>,
    pub accepts_roots: bool,
    pub repositories: Vec<String>,
}

/// Parsed sync configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub triggerable_name: String,
    pub lookback_count: u32,
    pub repository_groups: Vec<RepositoryGroupConfig>,
    pub syncers: Vec<SyncerConfig>,
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum SyncConfigError {
    #[error("Failed to read sync configuration {path}: {message}")]
    Io { path: String, message: String },

    #[error("Sync configuration is not valid JSON: {0}")]
    Json(String),

    #[error("Unrecognized parameter '{0}'")]
    UnrecognizedParameter(String),

    #[error("{0} should be a dictionary")]
    ExpectedObject(String),

    #[error("{0} should be of string type")]
    ExpectedString(String),

    #[error("{0} should be an array of strings")]
    ExpectedStringArray(String),

    #[error("{0} should be a non-negative integer")]
    ExpectedCount(String),

    #[error("{0} should be a boolean")]
    ExpectedBool(String),

    #[error("Property '{0}' must be either a string or a dictionary")]
    InvalidPropertyValue(String),

    #[error("Property '{0}' cannot contain more than one key")]
    MultiplePropertyKeys(String),

    #[error("Unrecognized named argument '{key}' in property '{name}'")]
    UnrecognizedNamedArgument { name: String, key: String },

    #[error("\"{0}\" is not a valid type in the configuration")]
    UnknownType(String),

    #[error("Configuration must specify {0}")]
    MissingField(&'static str),

    #[error("Build configuration for '{0}' cannot specify a test")]
    TestInBuildConfiguration(String),

    #[error("'{0}' is not a valid test path")]
    UnknownTest(String),

    #[error("'{0}' is not a valid platform name")]
    UnknownPlatform(String),

    #[error("Builder '{builder}' is configured twice for platform '{platform}' ({what})")]
    DuplicateConfiguration {
        builder: String,
        platform: String,
        what: String,
    },
}

/// Partially merged entry; every field may still be missing.
#[derive(Debug, Clone, Default)]
struct PartialConfig {
    type_name: Option<String>,
    builder: Option<String>,
    platform: Option<String>,
    test: Option<Vec<String>>,
    properties: Option<BTreeMap<String, PropertyTemplate>>,
    build_request_argument: Option<String>,
    worker_argument: Option<String>,
    worker_list: Option<Vec<String>>,
}

fn expect_object<'a>(value: &'a Value, context: &str) -> Result<&'a Map<String, Value>, SyncConfigError> {
    value
        .as_object()
        .ok_or_else(|| SyncConfigError::ExpectedObject(context.to_string()))
}

fn expect_string(value: &Value, context: &str) -> Result<String, SyncConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SyncConfigError::ExpectedString(context.to_string()))
}

fn expect_string_array(value: &Value, context: &str) -> Result<Vec<String>, SyncConfigError> {
    let invalid = || SyncConfigError::ExpectedStringArray(context.to_string());
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|part| part.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}

fn parse_property(name: &str, value: &Value) -> Result<PropertyTemplate, SyncConfigError> {
    if let Some(literal) = value.as_str() {
        return Ok(PropertyTemplate::Literal(literal.to_string()));
    }
    let object = value
        .as_object()
        .ok_or_else(|| SyncConfigError::InvalidPropertyValue(name.to_string()))?;
    if object.len() != 1 {
        return Err(SyncConfigError::MultiplePropertyKeys(name.to_string()));
    }
    let Some((key, named_value)) = object.iter().next() else {
        return Err(SyncConfigError::MultiplePropertyKeys(name.to_string()));
    };

    match key.as_str() {
        "root" => Ok(PropertyTemplate::Root(expect_string(
            named_value,
            &format!("root name of property '{}'", name),
        )?)),
        "rootsExcluding" => Ok(PropertyTemplate::RootsExcluding(expect_string_array(
            named_value,
            &format!("rootsExcluding of property '{}'", name),
        )?)),
        _ => Err(SyncConfigError::UnrecognizedNamedArgument {
            name: name.to_string(),
            key: key.clone(),
        }),
    }
}

impl PartialConfig {
    /// Validate `values` and merge them over this config.
    fn merge(&mut self, values: &Value, context: &str) -> Result<(), SyncConfigError> {
        for (name, value) in expect_object(values, context)? {
            match name.as_str() {
                "properties" | "arguments" => {
                    let properties = self.properties.get_or_insert_with(BTreeMap::new);
                    for (property, template) in expect_object(value, name)? {
                        properties.insert(property.clone(), parse_property(property, template)?);
                    }
                }
                "test" => self.test = Some(expect_string_array(value, "test")?),
                "workerList" | "slaveList" => {
                    self.worker_list = Some(expect_string_array(value, name)?)
                }
                "type" => self.type_name = Some(expect_string(value, name)?),
                "builder" => self.builder = Some(expect_string(value, name)?),
                "platform" => self.platform = Some(expect_string(value, name)?),
                "workerArgument" | "slaveArgument" => {
                    self.worker_argument = Some(expect_string(value, name)?)
                }
                "buildRequestArgument" => {
                    self.build_request_argument = Some(expect_string(value, name)?)
                }
                _ => return Err(SyncConfigError::UnrecognizedParameter(name.clone())),
            }
        }
        Ok(())
    }

    fn finish(self, is_test: bool) -> Result<SyncerConfig, SyncConfigError> {
        let platform = self
            .platform
            .ok_or(SyncConfigError::MissingField("a platform"))?;
        let role = if is_test {
            SyncerRole::Tester {
                test: self.test.ok_or(SyncConfigError::MissingField("a test"))?,
            }
        } else {
            if self.test.is_some() {
                return Err(SyncConfigError::TestInBuildConfiguration(platform));
            }
            SyncerRole::Builder
        };
        let builder = self
            .builder
            .ok_or(SyncConfigError::MissingField("a builder"))?;
        let properties = self.properties.ok_or(SyncConfigError::MissingField(
            "arguments to post to buildbot",
        ))?;
        let build_request_argument = self
            .build_request_argument
            .ok_or(SyncConfigError::MissingField("buildRequestArgument"))?;

        Ok(SyncerConfig {
            builder,
            platform,
            role,
            properties,
            build_request_argument,
            worker_argument: self.worker_argument,
            worker_list: self.worker_list,
        })
    }
}

/// Named templates (`types` or `builders`), validated eagerly.
fn parse_templates<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<BTreeMap<String, &'a Value>, SyncConfigError> {
    let mut templates = BTreeMap::new();
    if let Some(value) = root.get(key) {
        for (name, template) in expect_object(value, key)? {
            PartialConfig::default().merge(template, &format!("{} '{}'", key, name))?;
            templates.insert(name.clone(), template);
        }
    }
    Ok(templates)
}

fn parse_repository_groups(value: &Value) -> Result<Vec<RepositoryGroupConfig>, SyncConfigError> {
    let mut groups = Vec::new();
    for (name, group) in expect_object(value, "repositoryGroups")? {
        let context = format!("repository group '{}'", name);
        let mut description = None;
        let mut accepts_roots = false;
        let mut repositories = None;
        for (key, field) in expect_object(group, &context)? {
            match key.as_str() {
                "description" => description = Some(expect_string(field, "description")?),
                "acceptsRoots" => {
                    accepts_roots = field
                        .as_bool()
                        .ok_or_else(|| SyncConfigError::ExpectedBool("acceptsRoots".to_string()))?
                }
                "repositories" => repositories = Some(expect_string_array(field, "repositories")?),
                _ => return Err(SyncConfigError::UnrecognizedParameter(key.clone())),
            }
        }
        groups.push(RepositoryGroupConfig {
            name: name.clone(),
            description,
            accepts_roots,
            repositories: repositories
                .ok_or(SyncConfigError::MissingField("repositories for a repository group"))?,
        });
    }
    Ok(groups)
}

/// Parse and validate a sync configuration.
pub fn parse_sync_config(config: &Value) -> Result<SyncConfig, SyncConfigError> {
    let root = expect_object(config, "configuration")?;

    let mut defaults = PartialConfig::default();
    let mut triggerable_name = None;
    let mut lookback_count = DEFAULT_LOOKBACK_COUNT;
    let mut repository_groups = Vec::new();

    for (key, value) in root {
        match key.as_str() {
            "triggerableName" => triggerable_name = Some(expect_string(value, key)?),
            "lookbackCount" => {
                lookback_count = value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| SyncConfigError::ExpectedCount(key.clone()))?
            }
            "repositoryGroups" => repository_groups = parse_repository_groups(value)?,
            "buildRequestArgument" => {
                defaults.build_request_argument = Some(expect_string(value, key)?)
            }
            "workerArgument" | "slaveArgument" => {
                defaults.worker_argument = Some(expect_string(value, key)?)
            }
            "shared" | "types" | "builders" | "configurations" | "buildConfigurations" => {}
            _ => return Err(SyncConfigError::UnrecognizedParameter(key.clone())),
        }
    }

    let triggerable_name =
        triggerable_name.ok_or(SyncConfigError::MissingField("triggerableName"))?;
    if let Some(shared) = root.get("shared") {
        defaults.merge(shared, "shared")?;
    }
    let types = parse_templates(root, "types")?;
    let builders = parse_templates(root, "builders")?;

    let configurations = root
        .get("configurations")
        .ok_or(SyncConfigError::MissingField("configurations"))?;
    let mut entries: Vec<(&Value, bool)> = Vec::new();
    for entry in configurations
        .as_array()
        .ok_or_else(|| SyncConfigError::ExpectedObject("configurations".to_string()))?
    {
        entries.push((entry, true));
    }
    if let Some(build_configurations) = root.get("buildConfigurations") {
        for entry in build_configurations
            .as_array()
            .ok_or_else(|| SyncConfigError::ExpectedObject("buildConfigurations".to_string()))?
        {
            entries.push((entry, false));
        }
    }

    let mut syncers = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    for (entry, is_test) in entries {
        let mut merged = defaults.clone();
        merged.merge(entry, "configuration entry")?;

        if let Some(type_name) = merged.type_name.clone() {
            let template = types
                .get(&type_name)
                .ok_or_else(|| SyncConfigError::UnknownType(type_name.clone()))?;
            merged.merge(template, "type")?;
        }

        if let Some(builder) = merged.builder.clone()
            && let Some(template) = builders.get(&builder)
        {
            merged.merge(template, "builder")?;
        }

        let syncer = merged.finish(is_test)?;
        let what = syncer.test_path().map(|path| path.join(" > "));
        let key = (syncer.builder.clone(), syncer.platform.clone(), what.clone());
        if !seen.insert(key) {
            return Err(SyncConfigError::DuplicateConfiguration {
                builder: syncer.builder,
                platform: syncer.platform,
                what: what.unwrap_or_else(|| "build".to_string()),
            });
        }
        syncers.push(syncer);
    }

    Ok(SyncConfig {
        triggerable_name,
        lookback_count,
        repository_groups,
        syncers,
    })
}

/// Read and parse a sync configuration file.
pub fn load_sync_config_file(path: &Path) -> Result<SyncConfig, SyncConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let value: Value =
        serde_json::from_str(&content).map_err(|e| SyncConfigError::Json(e.to_string()))?;
    parse_sync_config(&value)
}
