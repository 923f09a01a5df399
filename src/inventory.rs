//! Instance and zone identity consumed by the allocation core.
//!
//! Scheduling and placement live elsewhere; this module only defines what
//! the core needs to know about instances and partitions, plus an in-memory
//! registry used by embedders and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::volume::AttachedVolume;

/// Identity of the account issuing a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Caller {
    /// Account name.
    pub account: String,
    /// Whether the caller may act on every account's resources.
    pub administrator: bool,
}

impl Caller {
    /// Creates a caller acting on its own resources.
    #[must_use]
    pub fn account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            administrator: false,
        }
    }

    /// Creates an administrator caller.
    #[must_use]
    pub fn administrator(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            administrator: true,
        }
    }

    /// Owner scope for lookups: `None` (any owner) for administrators.
    #[must_use]
    pub fn owner_scope(&self) -> Option<&str> {
        if self.administrator {
            None
        } else {
            Some(&self.account)
        }
    }
}

/// A live virtual machine instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Instance identifier.
    pub id: String,
    /// Owning account.
    pub owner: String,
    /// Partition the instance is placed in.
    pub partition: String,
    /// Public address confirmed by the network backend.
    pub public_address: Option<IpAddr>,
    /// Volumes currently attached to the instance.
    pub volumes: Vec<AttachedVolume>,
}

impl Instance {
    /// Creates an instance with no public address and no volumes.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            partition: partition.into(),
            public_address: None,
            volumes: Vec::new(),
        }
    }
}

/// Errors raised by the instance registry.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when the instance is not live.
    #[error("instance does not exist: {instance_id}")]
    InstanceNotFound {
        /// Instance identifier.
        instance_id: String,
    },
}

/// Lookup and mutation of live instances.
pub trait InstanceRegistry: Send + Sync {
    /// Returns the live instance with the given identifier.
    fn lookup_instance(&self, instance_id: &str) -> Option<Instance>;

    /// Returns every live instance.
    fn list_instances(&self) -> Vec<Instance>;

    /// Records the confirmed public address of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InstanceNotFound`] when the instance is gone.
    fn update_public_address(&self, instance_id: &str, address: IpAddr)
    -> Result<(), RegistryError>;

    /// Adds a volume association to its instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InstanceNotFound`] when the instance is gone.
    fn record_attachment(&self, attachment: AttachedVolume) -> Result<(), RegistryError>;

    /// Removes a volume association, returning it when present.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InstanceNotFound`] when the instance is gone.
    fn remove_attachment(
        &self,
        instance_id: &str,
        volume_id: &str,
    ) -> Result<Option<AttachedVolume>, RegistryError>;

    /// Finds the association for a volume on any live instance.
    fn find_attachment(&self, volume_id: &str) -> Option<AttachedVolume> {
        self.list_instances()
            .into_iter()
            .flat_map(|instance| instance.volumes)
            .find(|attachment| attachment.volume_id == volume_id)
    }
}

/// Known placement partitions.
pub trait ZoneDirectory: Send + Sync {
    /// Returns whether the zone is known.
    fn zone_exists(&self, zone: &str) -> bool;
}

#[derive(Debug, Default)]
struct InventoryState {
    instances: BTreeMap<String, Instance>,
    zones: BTreeSet<String>,
}

/// In-memory instance registry and zone directory.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    state: Mutex<InventoryState>,
}

impl MemoryInventory {
    /// Creates an inventory knowing the given zones.
    #[must_use]
    pub fn with_zones<I, S>(zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(InventoryState {
                instances: BTreeMap::new(),
                zones: zones.into_iter().map(Into::into).collect(),
            }),
        }
    }

    /// Registers or replaces a live instance.
    pub fn insert_instance(&self, instance: Instance) {
        self.state()
            .instances
            .insert(instance.id.clone(), instance);
    }

    /// Removes an instance, returning it when it was live.
    pub fn remove_instance(&self, instance_id: &str) -> Option<Instance> {
        self.state().instances.remove(instance_id)
    }

    fn state(&self) -> MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_instance<T>(
        &self,
        instance_id: &str,
        update: impl FnOnce(&mut Instance) -> T,
    ) -> Result<T, RegistryError> {
        let mut state = self.state();
        let instance =
            state
                .instances
                .get_mut(instance_id)
                .ok_or_else(|| RegistryError::InstanceNotFound {
                    instance_id: instance_id.to_owned(),
                })?;
        Ok(update(instance))
    }
}

impl InstanceRegistry for MemoryInventory {
    fn lookup_instance(&self, instance_id: &str) -> Option<Instance> {
        self.state().instances.get(instance_id).cloned()
    }

    fn list_instances(&self) -> Vec<Instance> {
        self.state().instances.values().cloned().collect()
    }

    fn update_public_address(
        &self,
        instance_id: &str,
        address: IpAddr,
    ) -> Result<(), RegistryError> {
        self.with_instance(instance_id, |instance| {
            instance.public_address = Some(address);
        })
    }

    fn record_attachment(&self, attachment: AttachedVolume) -> Result<(), RegistryError> {
        let instance_id = attachment.instance_id.clone();
        self.with_instance(&instance_id, |instance| instance.volumes.push(attachment))
    }

    fn remove_attachment(
        &self,
        instance_id: &str,
        volume_id: &str,
    ) -> Result<Option<AttachedVolume>, RegistryError> {
        self.with_instance(instance_id, |instance| {
            let position = instance
                .volumes
                .iter()
                .position(|attachment| attachment.volume_id == volume_id)?;
            Some(instance.volumes.remove(position))
        })
    }
}

impl ZoneDirectory for MemoryInventory {
    fn zone_exists(&self, zone: &str) -> bool {
        self.state().zones.contains(zone)
    }
}
