//! Create, delete, attach, and detach workflows for volumes.
//!
//! Each workflow pairs a short store transaction with one backend call:
//!
//! - create calls the backend first and inserts the record only after the
//!   backend confirms;
//! - delete confirms backend deletion before removing the record;
//! - attach and detach dispatch to the backend before touching the instance
//!   association.
//!
//! Transactions are rolled back before an error is returned and are never
//! held while the backend call is in flight. Every workflow holds the volume
//! identifier's lock from its first check to its last write.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::{BackendFuture, ProvisionOperation};
use crate::config::CoreConfig;
use crate::ident::{IdentifierSource, RandomIdentifiers};
use crate::inventory::{Caller, InstanceRegistry, ZoneDirectory};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::store::{RecordQuery, ResourceStore, StoreError, StoreTransaction};

use super::{
    AttachedVolume, CreateVolumeRequest, StorageVolumeRequest, Volume, VolumeBackend, VolumeError,
};

const DEFAULT_ID_PREFIX: &str = "vol";
const DEFAULT_IDENTIFIER_ATTEMPTS: u32 = 32;
const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

type Transaction<'a> = Box<dyn StoreTransaction + Send + 'a>;

/// Tunables for [`VolumeLifecycleManager`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSettings {
    /// Prefix of generated volume identifiers.
    pub id_prefix: String,
    /// Identifier candidates tried before giving up.
    pub max_identifier_attempts: u32,
    /// Timeout applied to every backend call.
    pub backend_timeout: Duration,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            id_prefix: String::from(DEFAULT_ID_PREFIX),
            max_identifier_attempts: DEFAULT_IDENTIFIER_ATTEMPTS,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }
}

impl From<&CoreConfig> for VolumeSettings {
    fn from(config: &CoreConfig) -> Self {
        Self {
            id_prefix: config.volume_id_prefix.clone(),
            max_identifier_attempts: config.max_identifier_attempts,
            backend_timeout: Duration::from_secs(config.backend_timeout_secs),
        }
    }
}

fn abort<T>(txn: Transaction<'_>, err: VolumeError) -> Result<T, VolumeError> {
    txn.rollback();
    Err(err)
}

/// Orchestrates volume workflows across the store, the backend, and the
/// instance registry.
pub struct VolumeLifecycleManager<S, B, R> {
    store: Arc<S>,
    backend: Arc<B>,
    inventory: Arc<R>,
    identifiers: Box<dyn IdentifierSource>,
    locks: KeyedLocks,
    settings: VolumeSettings,
}

impl<S, B, R> std::fmt::Debug for VolumeLifecycleManager<S, B, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeLifecycleManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<S, B, R> VolumeLifecycleManager<S, B, R>
where
    S: ResourceStore,
    B: VolumeBackend,
    R: InstanceRegistry + ZoneDirectory,
{
    /// Creates a manager with default settings and random identifiers.
    #[must_use]
    pub fn new(store: Arc<S>, backend: Arc<B>, inventory: Arc<R>) -> Self {
        Self {
            store,
            backend,
            inventory,
            identifiers: Box::new(RandomIdentifiers),
            locks: KeyedLocks::new(),
            settings: VolumeSettings::default(),
        }
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: VolumeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the identifier source.
    #[must_use]
    pub fn with_identifier_source(mut self, source: impl IdentifierSource + 'static) -> Self {
        self.identifiers = Box::new(source);
        self
    }

    async fn call_backend(
        &self,
        operation: ProvisionOperation,
        resource: &str,
        request: BackendFuture<'_, (), B::Error>,
    ) -> Result<(), VolumeError> {
        let message = match timeout(self.settings.backend_timeout, request).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("timed out after {:?}", self.settings.backend_timeout),
        };
        warn!(%operation, resource, error = %message, "backend call failed");
        Err(VolumeError::BackendProvisioningFailed {
            operation,
            resource: resource.to_owned(),
            message,
        })
    }

    fn lookup_volume(
        txn: &dyn StoreTransaction,
        caller: &Caller,
        volume_id: &str,
    ) -> Result<Volume, VolumeError> {
        txn.get_volume(&RecordQuery::by_id(caller.owner_scope(), volume_id))
            .map_err(|err| match err {
                StoreError::NotFound { .. } => VolumeError::VolumeNotFound {
                    volume_id: volume_id.to_owned(),
                },
                other => VolumeError::Store(other),
            })
    }

    /// Finds an identifier unused in the store and not claimed by a
    /// concurrent create. The returned guard keeps the claim.
    fn claim_identifier(
        &self,
        txn: &dyn StoreTransaction,
        owner_seed: &str,
    ) -> Result<(String, KeyGuard), VolumeError> {
        let prefix = &self.settings.id_prefix;
        for attempt in 1..=self.settings.max_identifier_attempts {
            let candidate = self.identifiers.generate(owner_seed, prefix);
            let Some(guard) = self.locks.try_lock(&candidate) else {
                debug!(%candidate, attempt, "identifier claimed concurrently");
                continue;
            };
            match txn.get_volume(&RecordQuery::by_id(None, &candidate)) {
                Err(StoreError::NotFound { .. }) => return Ok((candidate, guard)),
                Ok(_) => debug!(%candidate, attempt, "identifier already in use"),
                Err(other) => return Err(other.into()),
            }
        }
        Err(VolumeError::IdentifierSpaceExhausted {
            prefix: prefix.clone(),
            attempts: self.settings.max_identifier_attempts,
        })
    }

    /// Creates a volume once the backend has provisioned it.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidZone`], [`VolumeError::InvalidSize`], or
    /// [`VolumeError::SnapshotNotFound`] before any side effect,
    /// [`VolumeError::IdentifierSpaceExhausted`] when no identifier is free,
    /// and [`VolumeError::BackendProvisioningFailed`] when the backend
    /// refuses; no record exists in any of these cases.
    pub async fn create_volume(
        &self,
        caller: &Caller,
        request: &CreateVolumeRequest,
    ) -> Result<Volume, VolumeError> {
        if !self.inventory.zone_exists(&request.zone) {
            debug!(zone = %request.zone, "rejecting volume in unknown zone");
            return Err(VolumeError::InvalidZone {
                zone: request.zone.clone(),
            });
        }
        if request.size_gib == 0 {
            return Err(VolumeError::InvalidSize {
                size_gib: request.size_gib,
            });
        }

        let txn = self.store.begin();
        if let Some(snapshot_id) = &request.snapshot_id {
            let query = RecordQuery::by_id(caller.owner_scope(), snapshot_id);
            if let Err(err) = txn.get_snapshot(&query) {
                debug!(%snapshot_id, error = %err, "snapshot lookup failed");
                return abort(
                    txn,
                    VolumeError::SnapshotNotFound {
                        snapshot_id: snapshot_id.clone(),
                    },
                );
            }
        }
        let (volume_id, _claim) = match self.claim_identifier(txn.as_ref(), &caller.account) {
            Ok(claimed) => claimed,
            Err(err) => return abort(txn, err),
        };
        txn.rollback();

        let storage_request = StorageVolumeRequest {
            volume_id: volume_id.clone(),
            size_gib: request.size_gib,
            snapshot_id: request.snapshot_id.clone(),
        };
        self.call_backend(
            ProvisionOperation::CreateVolume,
            &volume_id,
            self.backend.create_volume(&storage_request),
        )
        .await?;

        let volume = Volume {
            volume_id: volume_id.clone(),
            owner: caller.account.clone(),
            size_gib: request.size_gib,
            zone: request.zone.clone(),
            snapshot_id: request.snapshot_id.clone(),
            display_name: request
                .display_name
                .clone()
                .unwrap_or_else(|| volume_id.clone()),
        };
        if let Err(err) = self.insert_volume(volume.clone()) {
            warn!(%volume_id, error = %err, "recording volume failed; deleting backend volume");
            if let Err(cleanup) = self
                .call_backend(
                    ProvisionOperation::DeleteVolume,
                    &volume_id,
                    self.backend.delete_volume(&volume_id),
                )
                .await
            {
                warn!(%volume_id, error = %cleanup, "backend volume left orphaned");
            }
            return Err(err);
        }

        info!(
            %volume_id,
            owner = %volume.owner,
            size_gib = volume.size_gib,
            zone = %volume.zone,
            "volume created"
        );
        Ok(volume)
    }

    fn insert_volume(&self, volume: Volume) -> Result<(), VolumeError> {
        let mut txn = self.store.begin();
        if let Err(err) = txn.insert_volume(volume) {
            return abort(txn, err.into());
        }
        txn.commit().map_err(VolumeError::from)
    }

    /// Deletes a volume after the backend confirms deletion.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::VolumeNotFound`] without calling the backend
    /// when the volume is not visible to the caller,
    /// [`VolumeError::VolumeInUse`] while the volume is attached, and
    /// [`VolumeError::BackendProvisioningFailed`] when the backend refuses,
    /// in which case the record is kept.
    pub async fn delete_volume(&self, caller: &Caller, volume_id: &str) -> Result<(), VolumeError> {
        let _guard = self.locks.lock(volume_id).await;

        let txn = self.store.begin();
        let volume = match Self::lookup_volume(txn.as_ref(), caller, volume_id) {
            Ok(volume) => volume,
            Err(err) => return abort(txn, err),
        };
        txn.rollback();

        if let Some(attachment) = self.inventory.find_attachment(&volume.volume_id) {
            return Err(VolumeError::VolumeInUse {
                volume_id: volume.volume_id,
                instance_id: attachment.instance_id,
            });
        }

        self.call_backend(
            ProvisionOperation::DeleteVolume,
            &volume.volume_id,
            self.backend.delete_volume(&volume.volume_id),
        )
        .await?;

        let mut write = self.store.begin();
        if let Err(err) = write.delete_volume(&volume.volume_id) {
            return abort(write, err.into());
        }
        write.commit()?;
        info!(volume_id = %volume.volume_id, "volume deleted");
        Ok(())
    }

    /// Attaches a volume to an instance and records the association.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidDevice`],
    /// [`VolumeError::InstanceNotFound`],
    /// [`VolumeError::VolumeAlreadyAttached`], or
    /// [`VolumeError::VolumeNotFound`] before calling the backend, and
    /// [`VolumeError::BackendProvisioningFailed`] when the backend refuses.
    pub async fn attach_volume(
        &self,
        caller: &Caller,
        instance_id: &str,
        volume_id: &str,
        device: &str,
    ) -> Result<AttachedVolume, VolumeError> {
        let device_name = device.trim();
        if device_name.is_empty() {
            debug!(volume_id, "rejected blank device name");
            return Err(VolumeError::InvalidDevice {
                volume_id: volume_id.to_owned(),
            });
        }
        let _guard = self.locks.lock(volume_id).await;

        let instance = self.inventory.lookup_instance(instance_id).ok_or_else(|| {
            VolumeError::InstanceNotFound {
                instance_id: instance_id.to_owned(),
            }
        })?;
        if let Some(existing) = self.inventory.find_attachment(volume_id) {
            return Err(VolumeError::VolumeAlreadyAttached {
                volume_id: volume_id.to_owned(),
                instance_id: existing.instance_id,
            });
        }

        let txn = self.store.begin();
        let volume = match Self::lookup_volume(txn.as_ref(), caller, volume_id) {
            Ok(volume) => volume,
            Err(err) => return abort(txn, err),
        };
        txn.commit()?;

        let attachment = AttachedVolume {
            volume_id: volume.volume_id,
            instance_id: instance.id,
            device: device_name.to_owned(),
        };
        self.call_backend(
            ProvisionOperation::AttachVolume,
            volume_id,
            self.backend.attach_volume(&attachment),
        )
        .await?;

        if let Err(err) = self.inventory.record_attachment(attachment.clone()) {
            warn!(volume_id, instance_id, error = %err, "recording attachment failed; detaching");
            if let Err(cleanup) = self
                .call_backend(
                    ProvisionOperation::DetachVolume,
                    volume_id,
                    self.backend.detach_volume(&attachment),
                )
                .await
            {
                warn!(volume_id, instance_id, error = %cleanup, "volume left attached at backend");
            }
            return Err(err.into());
        }

        info!(volume_id, instance_id, device = %attachment.device, "volume attached");
        Ok(attachment)
    }

    /// Detaches a volume from an instance and returns the removed
    /// association.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InstanceNotFound`],
    /// [`VolumeError::VolumeNotFound`], or [`VolumeError::VolumeNotAttached`]
    /// before calling the backend, and
    /// [`VolumeError::BackendProvisioningFailed`] when the backend refuses,
    /// in which case the association is kept.
    pub async fn detach_volume(
        &self,
        caller: &Caller,
        instance_id: &str,
        volume_id: &str,
    ) -> Result<AttachedVolume, VolumeError> {
        let _guard = self.locks.lock(volume_id).await;

        let instance = self.inventory.lookup_instance(instance_id).ok_or_else(|| {
            VolumeError::InstanceNotFound {
                instance_id: instance_id.to_owned(),
            }
        })?;

        let txn = self.store.begin();
        if let Err(err) = Self::lookup_volume(txn.as_ref(), caller, volume_id) {
            return abort(txn, err);
        }
        txn.commit()?;

        let not_attached = || VolumeError::VolumeNotAttached {
            volume_id: volume_id.to_owned(),
            instance_id: instance.id.clone(),
        };
        let attachment = self
            .inventory
            .find_attachment(volume_id)
            .filter(|attachment| attachment.instance_id == instance.id)
            .ok_or_else(not_attached)?;

        self.call_backend(
            ProvisionOperation::DetachVolume,
            volume_id,
            self.backend.detach_volume(&attachment),
        )
        .await?;

        let removed = self
            .inventory
            .remove_attachment(&instance.id, volume_id)?
            .ok_or_else(not_attached)?;
        info!(volume_id, instance_id, "volume detached");
        Ok(removed)
    }

    /// Lists volumes visible to the caller, optionally limited to the given
    /// identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Store`] when the store cannot be read.
    pub fn describe_volumes(
        &self,
        caller: &Caller,
        volume_ids: &[String],
    ) -> Result<Vec<Volume>, VolumeError> {
        let txn = self.store.begin();
        let volumes = match txn.query_volumes(&RecordQuery::by_owner(caller.owner_scope())) {
            Ok(volumes) => volumes,
            Err(err) => return abort(txn, err.into()),
        };
        txn.commit()?;
        Ok(volumes
            .into_iter()
            .filter(|volume| volume_ids.is_empty() || volume_ids.contains(&volume.volume_id))
            .collect())
    }
}
