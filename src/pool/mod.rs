//! Engine pool: bind-group name to an ordered list of engines.
//!
//! Built once from a [`RoutingConfig`] and never mutated afterwards, apart
//! from the per-group round-robin counters.

pub mod selector;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::{ConnectionUrl, RoutingConfig, Strategy};
use crate::core::{Result, RouterError};
use selector::Rotation;

/// A physical engine handle
///
/// Long-lived and shared; the router hands out `Arc<Engine>` clones.
#[derive(Debug)]
pub struct Engine {
    name: String,
    group: String,
    index: usize,
    weight: u32,
    url: ConnectionUrl,
}

impl Engine {
    /// Diagnostic name (`<group>-<index>` when none was configured)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind group this engine belongs to
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Position inside the group
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn url(&self) -> &ConnectionUrl {
        &self.url
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// Engines of one bind group plus its selection state
#[derive(Debug)]
pub struct EngineGroup {
    name: String,
    engines: Vec<Arc<Engine>>,
    rotation: Rotation,
}

impl EngineGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engines in configuration order; never empty
    pub fn engines(&self) -> &[Arc<Engine>] {
        &self.engines
    }

    pub fn first(&self) -> &Arc<Engine> {
        &self.engines[0]
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

/// Immutable set of bind groups
#[derive(Debug)]
pub struct EnginePool {
    groups: Vec<EngineGroup>,
    by_name: HashMap<String, usize>,
    default_idx: usize,
    read_idx: usize,
}

impl EnginePool {
    /// Build the pool, failing fast on any configuration problem
    ///
    /// Fails when the default or read group is missing, a group is empty,
    /// a connection string is malformed or a weight is zero.
    pub fn build(config: &RoutingConfig) -> Result<Self> {
        if config.default_group.is_empty() || config.read_group.is_empty() {
            return Err(RouterError::Configuration(
                "default_group and read_group must be non-empty names".into(),
            ));
        }

        let resolved = config.resolved_groups();
        if resolved.is_empty() {
            return Err(RouterError::Configuration(
                "no bind groups configured: set primary_connection_string or engines".into(),
            ));
        }

        let mut groups = Vec::with_capacity(resolved.len());
        let mut by_name = HashMap::with_capacity(resolved.len());

        for (group_name, descriptors) in resolved {
            if descriptors.is_empty() {
                return Err(RouterError::Configuration(format!(
                    "bind group '{}' has no engines",
                    group_name
                )));
            }

            let mut engines = Vec::with_capacity(descriptors.len());
            let mut weights = Vec::with_capacity(descriptors.len());

            for (index, descriptor) in descriptors.into_iter().enumerate() {
                if descriptor.weight == 0 {
                    return Err(RouterError::Configuration(format!(
                        "engine #{} of bind group '{}' has non-positive weight {}",
                        index, group_name, descriptor.weight
                    )));
                }

                let url = ConnectionUrl::parse(&descriptor.connection_string).map_err(|e| {
                    RouterError::Configuration(format!("bind group '{}': {}", group_name, e))
                })?;

                let name = descriptor
                    .name
                    .unwrap_or_else(|| format!("{}-{}", group_name, index));

                weights.push(descriptor.weight);
                engines.push(Arc::new(Engine {
                    name,
                    group: group_name.clone(),
                    index,
                    weight: descriptor.weight,
                    url,
                }));
            }

            let rotation = Rotation::new(&weights)?;
            by_name.insert(group_name.clone(), groups.len());
            groups.push(EngineGroup {
                name: group_name,
                engines,
                rotation,
            });
        }

        let lookup = |name: &str, role: &str| {
            by_name.get(name).copied().ok_or_else(|| {
                RouterError::Configuration(format!("{} group '{}' is not defined", role, name))
            })
        };
        let default_idx = lookup(&config.default_group, "default")?;
        let read_idx = lookup(&config.read_group, "read")?;

        let pool = Self {
            groups,
            by_name,
            default_idx,
            read_idx,
        };

        info!(
            groups = ?pool.summary(),
            default = %config.default_group,
            read = %config.read_group,
            "engine pool built"
        );

        Ok(pool)
    }

    /// Look up a bind group by name
    pub fn group(&self, name: &str) -> Result<&EngineGroup> {
        self.by_name
            .get(name)
            .map(|&idx| &self.groups[idx])
            .ok_or_else(|| RouterError::UnknownGroup(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn default_group(&self) -> &EngineGroup {
        &self.groups[self.default_idx]
    }

    pub fn read_group(&self) -> &EngineGroup {
        &self.groups[self.read_idx]
    }

    /// First engine of the default group
    pub fn primary(&self) -> &Arc<Engine> {
        self.default_group().first()
    }

    /// Select an engine from a named group
    pub fn select(&self, group: &str, strategy: Strategy) -> Result<&Arc<Engine>> {
        Ok(self.group(group)?.select(strategy))
    }

    pub fn groups(&self) -> impl Iterator<Item = &EngineGroup> {
        self.groups.iter()
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name()).collect()
    }

    fn summary(&self) -> Vec<(String, usize)> {
        self.groups
            .iter()
            .map(|g| (g.name.clone(), g.engines.len()))
            .collect()
    }
}
