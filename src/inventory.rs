use super::cluster::Instance;
use serde::Deserialize;
use std::{collections::HashSet, io, path::Path};
use thiserror::Error;

/// Provides the instances that should make up the cluster.
pub trait CloudInventory {
    /// Returns every instance that should be part of the cluster. The order must be stable across
    /// calls since it determines the order of the rendered initial cluster.
    fn instances(&self) -> Vec<Instance>;

    /// Returns the instance this process is running on.
    fn local_instance(&self) -> Instance;
}

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("unable to read inventory")]
    Io(#[from] io::Error),
    #[error("unable to parse inventory")]
    Parse(#[from] toml::de::Error),
    #[error("inventory contains no instances")]
    Empty,
    #[error("instance {0} is listed more than once")]
    DuplicateInstance(String),
    #[error("local instance {0} is not in the inventory")]
    UnknownLocalInstance(String),
    #[error("no local instance was given")]
    MissingLocalInstance,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InventoryFile {
    local: Option<String>,
    #[serde(default)]
    instances: Vec<Instance>,
}

/// An inventory that is read once from a TOML document and never changes afterwards.
#[derive(Clone, Debug)]
pub struct StaticInventory {
    instances: Vec<Instance>,
    local: Instance,
}

impl StaticInventory {
    pub fn new(instances: Vec<Instance>, local: Instance) -> Self {
        Self { instances, local }
    }

    /// Loads the inventory at the given path. If given, `local_id` takes precedence over the
    /// file's `local` entry.
    pub fn load<P: AsRef<Path>>(path: P, local_id: Option<&str>) -> Result<Self, InventoryError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents, local_id)
    }

    pub fn parse(contents: &str, local_id: Option<&str>) -> Result<Self, InventoryError> {
        let file: InventoryFile = toml::from_str(contents)?;
        if file.instances.is_empty() {
            return Err(InventoryError::Empty);
        }

        let mut seen = HashSet::new();
        for instance in &file.instances {
            if !seen.insert(instance.id.as_str()) {
                return Err(InventoryError::DuplicateInstance(instance.id.clone()));
            }
        }

        let local_id = match local_id.or_else(|| file.local.as_deref()) {
            Some(id) => id,
            None => return Err(InventoryError::MissingLocalInstance),
        };
        let local = file
            .instances
            .iter()
            .find(|instance| instance.id == local_id)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownLocalInstance(local_id.to_string()))?;

        Ok(Self {
            instances: file.instances,
            local,
        })
    }
}

impl CloudInventory for StaticInventory {
    fn instances(&self) -> Vec<Instance> {
        self.instances.clone()
    }

    fn local_instance(&self) -> Instance {
        self.local.clone()
    }
}
