//! Block-storage volume records and the lifecycle that provisions them.
//!
//! A volume exists in the local store only once the backend has confirmed
//! the physical volume, and leaves the store only once the backend has
//! confirmed deletion. Attachments live on the owning instance record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{Backend, BackendFuture, ProvisionOperation};
use crate::inventory::RegistryError;
use crate::store::StoreError;

pub mod manager;

pub use manager::{VolumeLifecycleManager, VolumeSettings};

/// A volume record as committed to the resource store.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Generated identifier, unique across all volumes.
    pub volume_id: String,
    /// Account owning the volume.
    pub owner: String,
    /// Size in GiB.
    pub size_gib: u32,
    /// Availability zone the volume was created in.
    pub zone: String,
    /// Snapshot the volume was created from, if any.
    pub snapshot_id: Option<String>,
    /// Human-friendly name; defaults to the identifier.
    pub display_name: String,
}

/// A snapshot record, consumed when creating volumes from snapshots.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Snapshot {
    /// Snapshot identifier.
    pub snapshot_id: String,
    /// Account owning the snapshot.
    pub owner: String,
    /// Volume the snapshot was taken from.
    pub source_volume_id: Option<String>,
}

/// Association between a volume and the instance it is attached to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AttachedVolume {
    /// Attached volume.
    pub volume_id: String,
    /// Instance holding the attachment.
    pub instance_id: String,
    /// Guest device name (for example `/dev/sdf`).
    pub device: String,
}

/// Caller-facing parameters for creating a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateVolumeRequest {
    /// Size in GiB.
    pub size_gib: u32,
    /// Target availability zone.
    pub zone: String,
    /// Optional snapshot to restore from.
    pub snapshot_id: Option<String>,
    /// Optional display name.
    pub display_name: Option<String>,
}

impl CreateVolumeRequest {
    /// Creates a request for an empty volume, trimming the zone.
    #[must_use]
    pub fn new(size_gib: u32, zone: impl Into<String>) -> Self {
        Self {
            size_gib,
            zone: zone.into().trim().to_owned(),
            snapshot_id: None,
            display_name: None,
        }
    }

    /// Sets the snapshot to restore from.
    #[must_use]
    pub fn snapshot_id(mut self, value: Option<String>) -> Self {
        self.snapshot_id = value.map(|id| id.trim().to_owned());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn display_name(mut self, value: impl Into<String>) -> Self {
        self.display_name = Some(value.into().trim().to_owned());
        self
    }
}

/// Request sent to the backend to create the physical volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StorageVolumeRequest {
    /// Identifier chosen by the core.
    pub volume_id: String,
    /// Size in GiB.
    pub size_gib: u32,
    /// Snapshot to restore from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

/// Backend operations required for volume management.
pub trait VolumeBackend: Backend {
    /// Creates the physical volume.
    fn create_volume<'a>(
        &'a self,
        request: &'a StorageVolumeRequest,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Deletes the physical volume.
    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, (), Self::Error>;

    /// Attaches a volume to an instance.
    fn attach_volume<'a>(
        &'a self,
        attachment: &'a AttachedVolume,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Detaches a volume from an instance.
    fn detach_volume<'a>(
        &'a self,
        attachment: &'a AttachedVolume,
    ) -> BackendFuture<'a, (), Self::Error>;
}

/// Errors surfaced by volume workflows.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// Raised when the requested zone is unknown.
    #[error("zone does not exist: {zone}")]
    InvalidZone {
        /// Zone named by the caller.
        zone: String,
    },
    /// Raised when the requested size is zero.
    #[error("invalid volume size: {size_gib} GiB")]
    InvalidSize {
        /// Size named by the caller.
        size_gib: u32,
    },
    /// Raised when the attachment device name is blank.
    #[error("invalid device name for volume {volume_id}")]
    InvalidDevice {
        /// Volume named by the caller.
        volume_id: String,
    },
    /// Raised when the source snapshot is missing or not visible.
    #[error("snapshot does not exist: {snapshot_id}")]
    SnapshotNotFound {
        /// Snapshot named by the caller.
        snapshot_id: String,
    },
    /// Raised when the volume is missing or not visible.
    #[error("volume does not exist: {volume_id}")]
    VolumeNotFound {
        /// Volume named by the caller.
        volume_id: String,
    },
    /// Raised when the instance is unknown.
    #[error("instance does not exist: {instance_id}")]
    InstanceNotFound {
        /// Instance named by the caller.
        instance_id: String,
    },
    /// Raised when attaching a volume some instance already holds.
    #[error("volume {volume_id} already attached to instance {instance_id}")]
    VolumeAlreadyAttached {
        /// Volume named by the caller.
        volume_id: String,
        /// Instance currently holding the volume.
        instance_id: String,
    },
    /// Raised when detaching a volume the instance does not hold.
    #[error("volume {volume_id} is not attached to instance {instance_id}")]
    VolumeNotAttached {
        /// Volume named by the caller.
        volume_id: String,
        /// Instance named by the caller.
        instance_id: String,
    },
    /// Raised when deleting a volume that is still attached.
    #[error("volume {volume_id} is in use by instance {instance_id}")]
    VolumeInUse {
        /// Volume named by the caller.
        volume_id: String,
        /// Instance holding the volume.
        instance_id: String,
    },
    /// Raised when no unused identifier was found within the attempt budget.
    #[error("no free {prefix} identifier after {attempts} attempts")]
    IdentifierSpaceExhausted {
        /// Identifier prefix.
        prefix: String,
        /// Attempts made.
        attempts: u32,
    },
    /// Raised when the backend rejects or fails a request.
    #[error("backend {operation} failed for {resource}: {message}")]
    BackendProvisioningFailed {
        /// Operation dispatched to the backend.
        operation: ProvisionOperation,
        /// Resource the operation targeted.
        resource: String,
        /// Message reported by the backend.
        message: String,
    },
    /// Wrapper for resource store failures.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Wrapper for instance registry failures.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
