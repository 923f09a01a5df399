//! Resource allocation core for an infrastructure-as-a-service controller.
//!
//! The crate hands out system-owned public addresses from a reserved pool and
//! drives block-storage volumes through create, delete, attach, and detach.
//! Physical work is delegated to a provisioning backend; the core keeps its
//! own records consistent with whatever the backend confirms.

pub mod address;
pub mod backend;
pub mod config;
pub mod http;
pub mod ident;
pub mod inventory;
pub mod locks;
pub mod store;
pub mod test_support;
pub mod volume;

pub use address::{
    Address, AddressAssignmentCoordinator, AddressError, AddressOwner, AddressPool, AddressState,
    BindingEvent, BindingTask, ReconcileSummary,
};
pub use backend::{Backend, BackendFuture, ProvisionOperation};
pub use config::{ConfigError, CoreConfig, ProvisionerConfig};
pub use http::{HttpProvisioner, HttpProvisionerError};
pub use ident::{IdentifierSource, RandomIdentifiers};
pub use inventory::{Caller, Instance, InstanceRegistry, MemoryInventory, RegistryError, ZoneDirectory};
pub use store::{MemoryStore, RecordKind, RecordQuery, ResourceStore, StoreError, StoreTransaction};
pub use volume::{
    AttachedVolume, CreateVolumeRequest, Snapshot, StorageVolumeRequest, Volume, VolumeBackend,
    VolumeError, VolumeLifecycleManager, VolumeSettings,
};
