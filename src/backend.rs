//! Backend abstraction for the provisioning service that performs the real
//! network and storage work.
//!
//! The core never talks to hypervisors or storage controllers directly. It
//! orchestrates calls through the traits in this module and
//! [`crate::volume::VolumeBackend`], keeping its own records consistent with
//! whatever the backend confirms.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations dispatched to the provisioning backend.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProvisionOperation {
    /// Create a physical volume.
    CreateVolume,
    /// Delete a physical volume.
    DeleteVolume,
    /// Attach a volume to an instance.
    AttachVolume,
    /// Detach a volume from an instance.
    DetachVolume,
    /// Bind a public address to an instance at the network layer.
    BindAddress,
}

impl ProvisionOperation {
    /// Returns the wire-style name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateVolume => "create-volume",
            Self::DeleteVolume => "delete-volume",
            Self::AttachVolume => "attach-volume",
            Self::DetachVolume => "detach-volume",
            Self::BindAddress => "bind-address",
        }
    }
}

impl fmt::Display for ProvisionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal interface implemented by provisioning backends.
pub trait Backend: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Binds `address` to the instance at the network layer.
    ///
    /// The address has already been claimed in the local pool; the backend
    /// only has to make it routable to the instance.
    fn bind_address<'a>(
        &'a self,
        address: IpAddr,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), Self::Error>;
}
