//! Test support utilities shared across unit and integration tests.

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsString;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, watch};

use crate::backend::{Backend, BackendFuture, ProvisionOperation};
use crate::volume::{AttachedVolume, StorageVolumeRequest, VolumeBackend};

/// Error returned by [`ScriptedProvisioner`] when a failure is scripted.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted {operation} rejection")]
pub struct ScriptedProvisionerError {
    /// Operation that was rejected.
    pub operation: ProvisionOperation,
}

/// Calls observed by a [`ScriptedProvisioner`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisionerCalls {
    /// Create requests received.
    pub created: Vec<StorageVolumeRequest>,
    /// Volume identifiers passed to delete.
    pub deleted: Vec<String>,
    /// Attach requests received.
    pub attached: Vec<AttachedVolume>,
    /// Detach requests received.
    pub detached: Vec<AttachedVolume>,
    /// Address bindings received.
    pub bound: Vec<(IpAddr, String)>,
}

#[derive(Debug, Default)]
struct State {
    failing: BTreeSet<&'static str>,
    stalled: BTreeSet<&'static str>,
    calls: ProvisionerCalls,
}

/// Scripted backend that records every call and fails, stalls, or holds on
/// demand.
#[derive(Clone, Debug)]
pub struct ScriptedProvisioner {
    state: Arc<Mutex<State>>,
    held: Arc<watch::Sender<BTreeSet<&'static str>>>,
}

impl Default for ScriptedProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvisioner {
    /// Creates a provisioner that accepts every call immediately.
    #[must_use]
    pub fn new() -> Self {
        let (held, _) = watch::channel(BTreeSet::new());
        Self {
            state: Arc::new(Mutex::new(State::default())),
            held: Arc::new(held),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent call of `operation` fail.
    pub fn fail(&self, operation: ProvisionOperation) {
        self.state().failing.insert(operation.as_str());
    }

    /// Makes every subsequent call of `operation` never complete.
    pub fn stall(&self, operation: ProvisionOperation) {
        self.state().stalled.insert(operation.as_str());
    }

    /// Holds calls of `operation` after recording them, until
    /// [`Self::release`] is called.
    pub fn hold(&self, operation: ProvisionOperation) {
        self.held.send_modify(|held| {
            held.insert(operation.as_str());
        });
    }

    /// Lets held and future calls of `operation` proceed.
    pub fn release(&self, operation: ProvisionOperation) {
        self.held.send_modify(|held| {
            held.remove(operation.as_str());
        });
    }

    /// Holds address bindings until [`Self::release_binds`] is called.
    pub fn hold_binds(&self) {
        self.hold(ProvisionOperation::BindAddress);
    }

    /// Lets held and future address bindings proceed.
    pub fn release_binds(&self) {
        self.release(ProvisionOperation::BindAddress);
    }

    /// Returns a snapshot of the calls received so far.
    #[must_use]
    pub fn calls(&self) -> ProvisionerCalls {
        self.state().calls.clone()
    }

    fn outcome<'a>(
        &'a self,
        operation: ProvisionOperation,
        record: impl FnOnce(&mut ProvisionerCalls) + Send + 'a,
    ) -> BackendFuture<'a, (), ScriptedProvisionerError> {
        Box::pin(async move {
            let (failing, stalled) = {
                let mut state = self.state();
                record(&mut state.calls);
                (
                    state.failing.contains(operation.as_str()),
                    state.stalled.contains(operation.as_str()),
                )
            };
            let mut gate = self.held.subscribe();
            let released = gate
                .wait_for(|held_ops| !held_ops.contains(operation.as_str()))
                .await
                .is_ok();
            if !released {
                return Err(ScriptedProvisionerError { operation });
            }
            if stalled {
                std::future::pending::<()>().await;
            }
            if failing {
                return Err(ScriptedProvisionerError { operation });
            }
            Ok(())
        })
    }
}

impl Backend for ScriptedProvisioner {
    type Error = ScriptedProvisionerError;

    fn bind_address<'a>(
        &'a self,
        address: IpAddr,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        self.outcome(ProvisionOperation::BindAddress, move |calls| {
            calls.bound.push((address, instance_id.to_owned()));
        })
    }
}

impl VolumeBackend for ScriptedProvisioner {
    fn create_volume<'a>(
        &'a self,
        request: &'a StorageVolumeRequest,
    ) -> BackendFuture<'a, (), Self::Error> {
        self.outcome(ProvisionOperation::CreateVolume, move |calls| {
            calls.created.push(request.clone());
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, (), Self::Error> {
        self.outcome(ProvisionOperation::DeleteVolume, move |calls| {
            calls.deleted.push(volume_id.to_owned());
        })
    }

    fn attach_volume<'a>(
        &'a self,
        attachment: &'a AttachedVolume,
    ) -> BackendFuture<'a, (), Self::Error> {
        self.outcome(ProvisionOperation::AttachVolume, move |calls| {
            calls.attached.push(attachment.clone());
        })
    }

    fn detach_volume<'a>(
        &'a self,
        attachment: &'a AttachedVolume,
    ) -> BackendFuture<'a, (), Self::Error> {
        self.outcome(ProvisionOperation::DetachVolume, move |calls| {
            calls.detached.push(attachment.clone());
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
