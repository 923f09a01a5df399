//! Shared fixtures for volume lifecycle scenarios.

use std::sync::Arc;

use quartermaster::test_support::ScriptedProvisioner;
use quartermaster::{MemoryInventory, MemoryStore, Volume, VolumeError, VolumeLifecycleManager};
use rstest::fixture;

pub type Manager = VolumeLifecycleManager<MemoryStore, ScriptedProvisioner, MemoryInventory>;

#[derive(Clone, Debug)]
pub struct VolumeContext {
    pub store: Arc<MemoryStore>,
    pub backend: ScriptedProvisioner,
    pub inventory: Arc<MemoryInventory>,
    pub manager: Arc<Manager>,
    pub volume: Option<Volume>,
    pub outcome: Option<Outcome>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Success,
    Failure { kind: &'static str, message: String },
}

impl Outcome {
    pub fn from_result<T>(result: &Result<T, VolumeError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => Self::Failure {
                kind: failure_kind(err),
                message: err.to_string(),
            },
        }
    }
}

const fn failure_kind(err: &VolumeError) -> &'static str {
    match err {
        VolumeError::InvalidZone { .. } => "invalid-zone",
        VolumeError::InvalidSize { .. } => "invalid-size",
        VolumeError::InvalidDevice { .. } => "invalid-device",
        VolumeError::SnapshotNotFound { .. } => "snapshot-not-found",
        VolumeError::VolumeNotFound { .. } => "volume-not-found",
        VolumeError::InstanceNotFound { .. } => "instance-not-found",
        VolumeError::VolumeAlreadyAttached { .. } => "volume-already-attached",
        VolumeError::VolumeNotAttached { .. } => "volume-not-attached",
        VolumeError::VolumeInUse { .. } => "volume-in-use",
        VolumeError::IdentifierSpaceExhausted { .. } => "identifier-space-exhausted",
        VolumeError::BackendProvisioningFailed { .. } => "backend",
        VolumeError::Store(_) => "store",
        VolumeError::Registry(_) => "registry",
    }
}

impl VolumeContext {
    pub fn with_zones(zones: &[&str]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let backend = ScriptedProvisioner::new();
        let inventory = Arc::new(MemoryInventory::with_zones(zones.iter().copied()));
        let manager = Arc::new(VolumeLifecycleManager::new(
            Arc::clone(&store),
            Arc::new(backend.clone()),
            Arc::clone(&inventory),
        ));
        Self {
            store,
            backend,
            inventory,
            manager,
            volume: None,
            outcome: None,
        }
    }

    pub fn volume_id(&self) -> &str {
        self.volume
            .as_ref()
            .map_or("vol-unknown", |volume| volume.volume_id.as_str())
    }
}

#[fixture]
pub fn volume_context() -> VolumeContext {
    VolumeContext::with_zones(&[])
}
