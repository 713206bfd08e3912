pub mod url;

use crate::core::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub use self::url::ConnectionUrl;

pub const DEFAULT_GROUP: &str = "default";
pub const READ_GROUP: &str = "read";
pub const DEFAULT_CLASSIFIER_CACHE_SIZE: usize = 1024;

/// Replica selection strategy within a bind group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
}

/// SQL dialect used when classifying statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    #[default]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
    Generic,
}

/// One physical engine in a bind group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DescriptorRepr")]
pub struct EngineDescriptor {
    pub connection_string: String,
    pub weight: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Replicas use the same shape as any other engine.
pub type ReplicaDescriptor = EngineDescriptor;

impl EngineDescriptor {
    pub fn new(connection_string: &str) -> Self {
        Self {
            connection_string: connection_string.to_string(),
            weight: 1,
            name: None,
        }
    }

    /// Set the selection weight
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set a diagnostic name
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

// Descriptors may be written as a bare connection string in JSON.
#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorRepr {
    Url(String),
    Full {
        #[serde(alias = "url")]
        connection_string: String,
        #[serde(default = "default_weight")]
        weight: u32,
        #[serde(default)]
        name: Option<String>,
    },
}

fn default_weight() -> u32 {
    1
}

impl From<DescriptorRepr> for EngineDescriptor {
    fn from(repr: DescriptorRepr) -> Self {
        match repr {
            DescriptorRepr::Url(url) => EngineDescriptor::new(&url),
            DescriptorRepr::Full {
                connection_string,
                weight,
                name,
            } => EngineDescriptor {
                connection_string,
                weight,
                name,
            },
        }
    }
}

/// Routing configuration
///
/// Two compatible forms are accepted:
/// - simple: `primary_connection_string` + `replicas`, which populate the
///   default and read groups;
/// - general: `engines`, a map of bind-group name to engines.
///
/// Groups given explicitly in `engines` take precedence over the simple form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_connection_string: Option<String>,

    pub replicas: Vec<ReplicaDescriptor>,

    pub engines: BTreeMap<String, Vec<EngineDescriptor>>,

    /// Group receiving writes and pinned reads
    pub default_group: String,

    /// Group receiving plain reads
    pub read_group: String,

    pub strategy: Strategy,

    /// Pin reads to the default group after the first write of a transaction
    pub sticky_after_write: bool,

    /// When false, every decision resolves to the first engine of the default group
    pub enabled: bool,

    /// Capacity of the SQL classification cache (0 disables caching)
    pub classifier_cache_size: usize,

    pub dialect: SqlDialect,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            primary_connection_string: None,
            replicas: Vec::new(),
            engines: BTreeMap::new(),
            default_group: DEFAULT_GROUP.to_string(),
            read_group: READ_GROUP.to_string(),
            strategy: Strategy::RoundRobin,
            sticky_after_write: true,
            enabled: true,
            classifier_cache_size: DEFAULT_CLASSIFIER_CACHE_SIZE,
            dialect: SqlDialect::Postgres,
        }
    }
}

impl RoutingConfig {
    /// Create a configuration in the simple form
    ///
    /// # Examples
    ///
    /// ```
    /// # use bindroute::{RoutingConfig, Strategy};
    /// let config = RoutingConfig::new("postgres://app:pw@primary/shop")
    ///     .replica("postgres://app:pw@replica-1/shop")
    ///     .weighted_replica("postgres://app:pw@replica-2/shop", 2)
    ///     .strategy(Strategy::Random);
    ///
    /// assert_eq!(config.replicas.len(), 2);
    /// ```
    pub fn new(primary_connection_string: &str) -> Self {
        Self {
            primary_connection_string: Some(primary_connection_string.to_string()),
            ..Self::default()
        }
    }

    /// Create an empty configuration for the bind-group form
    pub fn with_engines() -> Self {
        Self::default()
    }

    /// Add a replica with weight 1
    pub fn replica(self, connection_string: &str) -> Self {
        self.replica_descriptor(EngineDescriptor::new(connection_string))
    }

    /// Add a weighted replica
    pub fn weighted_replica(self, connection_string: &str, weight: u32) -> Self {
        self.replica_descriptor(EngineDescriptor::new(connection_string).weight(weight))
    }

    pub fn replica_descriptor(mut self, descriptor: ReplicaDescriptor) -> Self {
        self.replicas.push(descriptor);
        self
    }

    /// Define (or replace) a whole bind group
    pub fn group(mut self, name: &str, engines: Vec<EngineDescriptor>) -> Self {
        self.engines.insert(name.to_string(), engines);
        self
    }

    /// Append one engine to a bind group, creating the group if needed
    pub fn engine(mut self, group: &str, descriptor: EngineDescriptor) -> Self {
        self.engines
            .entry(group.to_string())
            .or_default()
            .push(descriptor);
        self
    }

    pub fn default_group(mut self, name: &str) -> Self {
        self.default_group = name.to_string();
        self
    }

    pub fn read_group(mut self, name: &str) -> Self {
        self.read_group = name.to_string();
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn sticky_after_write(mut self, sticky: bool) -> Self {
        self.sticky_after_write = sticky;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn classifier_cache_size(mut self, size: usize) -> Self {
        self.classifier_cache_size = size;
        self
    }

    pub fn dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Load a configuration from JSON
    ///
    /// # Examples
    ///
    /// ```
    /// # use bindroute::{RoutingConfig, Strategy};
    /// let config = RoutingConfig::from_json(r#"{
    ///     "primary_connection_string": "postgres://primary/app",
    ///     "replicas": ["postgres://r1/app", {"url": "postgres://r2/app", "weight": 3}],
    ///     "strategy": "random"
    /// }"#).unwrap();
    ///
    /// assert_eq!(config.strategy, Strategy::Random);
    /// assert_eq!(config.replicas[1].weight, 3);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| RouterError::Configuration(format!("invalid routing config: {}", e)))
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Configuration(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RouterError::Configuration(e.to_string()))
    }

    /// Bind groups after expanding the simple form
    ///
    /// The primary populates the default group and the replicas populate the
    /// read group, unless `engines` already defines those groups. Without
    /// replicas, the read group falls back to the primary.
    pub fn resolved_groups(&self) -> BTreeMap<String, Vec<EngineDescriptor>> {
        let mut groups = self.engines.clone();

        let primary = self
            .primary_connection_string
            .as_deref()
            .map(|url| EngineDescriptor::new(url).name("primary"));

        if let Some(primary) = &primary {
            groups
                .entry(self.default_group.clone())
                .or_insert_with(|| vec![primary.clone()]);
        }

        if !self.replicas.is_empty() {
            groups
                .entry(self.read_group.clone())
                .or_insert_with(|| self.replicas.clone());
        } else if let Some(primary) = primary {
            groups
                .entry(self.read_group.clone())
                .or_insert_with(|| vec![primary]);
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RoutingConfig::default();
        assert_eq!(config.default_group, "default");
        assert_eq!(config.read_group, "read");
        assert_eq!(config.strategy, Strategy::RoundRobin);
        assert!(config.sticky_after_write);
        assert!(config.enabled);
    }

    #[test]
    fn test_builder_pattern() {
        let config = RoutingConfig::new("postgres://primary/app")
            .replica("postgres://r1/app")
            .weighted_replica("postgres://r2/app", 3)
            .engine("analytics", EngineDescriptor::new("postgres://olap/app").name("olap"))
            .strategy(Strategy::Random)
            .sticky_after_write(false);

        assert_eq!(config.replicas.len(), 2);
        assert_eq!(config.replicas[1].weight, 3);
        assert_eq!(config.engines["analytics"][0].name.as_deref(), Some("olap"));
        assert_eq!(config.strategy, Strategy::Random);
        assert!(!config.sticky_after_write);
    }

    #[test]
    fn test_simple_form_populates_groups() {
        let config = RoutingConfig::new("postgres://primary/app")
            .replica("postgres://r1/app")
            .replica("postgres://r2/app");

        let groups = config.resolved_groups();
        assert_eq!(groups["default"].len(), 1);
        assert_eq!(groups["default"][0].connection_string, "postgres://primary/app");
        assert_eq!(groups["read"].len(), 2);
    }

    #[test]
    fn test_no_replicas_reads_from_primary() {
        let groups = RoutingConfig::new("postgres://primary/app").resolved_groups();
        assert_eq!(groups["read"][0].connection_string, "postgres://primary/app");
    }

    #[test]
    fn test_explicit_engines_take_precedence() {
        let config = RoutingConfig::new("postgres://primary/app")
            .replica("postgres://r1/app")
            .group("read", vec![EngineDescriptor::new("postgres://other/app")]);

        let groups = config.resolved_groups();
        assert_eq!(groups["read"].len(), 1);
        assert_eq!(groups["read"][0].connection_string, "postgres://other/app");
    }

    #[test]
    fn test_from_json_mixed_descriptors() {
        let config = RoutingConfig::from_json(
            r#"{
                "engines": {
                    "default": [{"connection_string": "postgres://p/app", "name": "main"}],
                    "read": ["postgres://r1/app", {"url": "postgres://r2/app", "weight": 2}]
                },
                "sticky_after_write": false,
                "enabled": false
            }"#,
        )
        .unwrap();

        assert_eq!(config.engines["default"][0].name.as_deref(), Some("main"));
        assert_eq!(config.engines["read"][0].weight, 1);
        assert_eq!(config.engines["read"][1].weight, 2);
        assert!(!config.sticky_after_write);
        assert!(!config.enabled);
        assert_eq!(config.read_group, "read");
    }

    #[test]
    fn test_from_json_rejects_bad_strategy() {
        let err = RoutingConfig::from_json(r#"{"strategy": "least_busy"}"#).unwrap_err();
        assert!(matches!(err, RouterError::Configuration(_)));
    }

    #[test]
    fn test_json_roundtrip_keeps_groups() {
        let config = RoutingConfig::with_engines()
            .engine("default", EngineDescriptor::new("postgres://p/app"))
            .engine("read", EngineDescriptor::new("postgres://r/app").weight(4));

        let parsed = RoutingConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
