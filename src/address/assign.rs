//! Binding allocated addresses to running instances.
//!
//! Assignment claims an address synchronously and hands the network binding
//! to a spawned task. The instance's public address changes only once the
//! backend confirms the binding. Failed bindings are not compensated here;
//! they are reported through the returned [`BindingTask`] and to every
//! [`AddressAssignmentCoordinator::subscribe`] receiver so the caller can
//! decide whether to release the address.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::inventory::{Instance, InstanceRegistry};

use super::{Address, AddressError, AddressOwner, AddressPool};

const EVENT_CAPACITY: usize = 64;
const DEFAULT_BIND_TIMEOUT: Duration = Duration::from_secs(30);

/// Completion of an asynchronous address binding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BindingEvent {
    /// The backend bound the address and the instance record was updated.
    Bound {
        /// Bound address.
        address: IpAddr,
        /// Instance now reachable at the address.
        instance_id: String,
    },
    /// The binding did not complete; the address stays assigned.
    Failed {
        /// Address that was being bound.
        address: IpAddr,
        /// Instance the address was assigned to.
        instance_id: String,
        /// Failure reported by the backend or the registry.
        message: String,
    },
}

/// Handle to a submitted binding.
#[derive(Debug)]
pub struct BindingTask {
    address: Address,
    handle: JoinHandle<BindingEvent>,
}

impl BindingTask {
    /// Address claimed for the instance.
    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// Waits for the binding to complete.
    pub async fn wait(self) -> BindingEvent {
        match self.handle.await {
            Ok(event) => event,
            Err(err) => BindingEvent::Failed {
                address: self.address.value,
                instance_id: self.address.instance_id.unwrap_or_default(),
                message: err.to_string(),
            },
        }
    }
}

/// Assigns pool addresses to instances through the network backend.
#[derive(Debug)]
pub struct AddressAssignmentCoordinator<B, R> {
    pool: Arc<AddressPool>,
    backend: Arc<B>,
    registry: Arc<R>,
    runtime: Handle,
    events: broadcast::Sender<BindingEvent>,
    bind_timeout: Duration,
}

impl<B, R> AddressAssignmentCoordinator<B, R>
where
    B: Backend + 'static,
    R: InstanceRegistry + 'static,
{
    /// Creates a coordinator spawning binding tasks on `runtime`.
    #[must_use]
    pub fn new(pool: Arc<AddressPool>, backend: Arc<B>, registry: Arc<R>, runtime: Handle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pool,
            backend,
            registry,
            runtime,
            events,
            bind_timeout: DEFAULT_BIND_TIMEOUT,
        }
    }

    /// Overrides the timeout applied to each backend binding.
    #[must_use]
    pub const fn with_bind_timeout(mut self, bind_timeout: Duration) -> Self {
        self.bind_timeout = bind_timeout;
        self
    }

    /// Subscribes to completion events for every binding submitted after
    /// this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BindingEvent> {
        self.events.subscribe()
    }

    /// Claims an address for `instance` and submits the network binding.
    ///
    /// Returns as soon as the binding is submitted. The address is already
    /// assigned in the pool; the instance's public address is updated when
    /// the backend confirms.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::NotEnoughResources`] when the pool has no
    /// free address.
    pub fn assign(&self, instance: &Instance) -> Result<BindingTask, AddressError> {
        let claimed = self.pool.allocate_one(&instance.partition)?;
        let address = match self.pool.assign(claimed.value, &instance.id) {
            Ok(address) => address,
            Err(err) => {
                if let Err(release_err) = self.pool.release(claimed.value, &AddressOwner::System) {
                    warn!(address = %claimed.value, error = %release_err, "failed to return claimed address");
                }
                return Err(err);
            }
        };
        debug!(address = %address.value, instance_id = %instance.id, "dispatching address binding");

        let backend = Arc::clone(&self.backend);
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let bind_timeout = self.bind_timeout;
        let value = address.value;
        let instance_id = instance.id.clone();
        let handle = self.runtime.spawn(async move {
            let event = bind(backend.as_ref(), registry.as_ref(), value, instance_id, bind_timeout).await;
            if events.send(event.clone()).is_err() {
                debug!(address = %value, "no binding subscribers");
            }
            event
        });

        Ok(BindingTask { address, handle })
    }
}

async fn bind<B: Backend, R: InstanceRegistry>(
    backend: &B,
    registry: &R,
    address: IpAddr,
    instance_id: String,
    bind_timeout: Duration,
) -> BindingEvent {
    let outcome = timeout(bind_timeout, backend.bind_address(address, &instance_id)).await;
    let failure = match outcome {
        Ok(Ok(())) => match registry.update_public_address(&instance_id, address) {
            Ok(()) => {
                info!(address = %address, instance_id = %instance_id, "address bound");
                return BindingEvent::Bound {
                    address,
                    instance_id,
                };
            }
            Err(err) => err.to_string(),
        },
        Ok(Err(err)) => err.to_string(),
        Err(_) => format!("timed out after {bind_timeout:?}"),
    };
    warn!(address = %address, instance_id = %instance_id, error = %failure, "address binding failed");
    BindingEvent::Failed {
        address,
        instance_id,
        message: failure,
    }
}
