//! System-owned public address pool.
//!
//! The pool hands out addresses reserved by the infrastructure and keeps the
//! number of reserved addresses aligned with a configured target. Addresses
//! outside the reserved pool sit in a disabled backlog until reconciliation
//! activates them.
//!
//! Every scan-and-mark runs inside one critical section, so two concurrent
//! allocations can never claim the same address.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info};

pub mod assign;

pub use assign::{AddressAssignmentCoordinator, BindingEvent, BindingTask};

/// Allocation state of an address.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AddressState {
    /// Available for allocation.
    Free,
    /// Claimed by an allocation, not yet bound.
    Pending,
    /// Bound to exactly one instance.
    Assigned,
    /// Held back from the active pool.
    Disabled,
}

impl AddressState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AddressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of an address.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AddressOwner {
    /// Nobody holds the address.
    Unowned,
    /// The infrastructure holds the address for any instance.
    System,
    /// A user account acquired the address independently.
    Account(String),
}

impl AddressOwner {
    /// Returns whether the infrastructure owns the address.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

impl fmt::Display for AddressOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unowned => f.write_str("nobody"),
            Self::System => f.write_str("system"),
            Self::Account(account) => f.write_str(account),
        }
    }
}

/// A public address tracked by the pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Address {
    /// Network address.
    pub value: IpAddr,
    /// Current owner.
    pub owner: AddressOwner,
    /// Current allocation state.
    pub state: AddressState,
    /// Partition the address was allocated for.
    pub partition: Option<String>,
    /// Instance the address is bound to.
    pub instance_id: Option<String>,
}

impl Address {
    /// Creates an address in the disabled backlog.
    #[must_use]
    pub const fn disabled(value: IpAddr) -> Self {
        Self {
            value,
            owner: AddressOwner::Unowned,
            state: AddressState::Disabled,
            partition: None,
            instance_id: None,
        }
    }

    /// Creates a free, system-owned address.
    #[must_use]
    pub const fn reserved(value: IpAddr) -> Self {
        Self {
            value,
            owner: AddressOwner::System,
            state: AddressState::Free,
            partition: None,
            instance_id: None,
        }
    }

    /// Returns whether the infrastructure owns the address.
    #[must_use]
    pub const fn is_system_owned(&self) -> bool {
        self.owner.is_system()
    }

    fn is_allocatable(&self) -> bool {
        self.is_system_owned() && self.state == AddressState::Free
    }

    fn clear(&mut self) {
        self.state = AddressState::Free;
        self.partition = None;
        self.instance_id = None;
    }
}

/// Errors raised by the address pool.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AddressError {
    /// Raised when the pool cannot satisfy an allocation.
    #[error(
        "not enough addresses in partition {partition}: requested {requested}, available {available}"
    )]
    NotEnoughResources {
        /// Partition the allocation was for.
        partition: String,
        /// Number of addresses requested.
        requested: usize,
        /// Number of addresses that qualified.
        available: usize,
    },
    /// Raised when the address is not tracked by the pool.
    #[error("address {address} is not in the pool")]
    AddressNotFound {
        /// Address named by the caller.
        address: IpAddr,
    },
    /// Raised when the caller may not release the address.
    #[error("address {address} owned by {owner} cannot be released by {requester}")]
    NotReleasable {
        /// Address named by the caller.
        address: IpAddr,
        /// Current owner.
        owner: AddressOwner,
        /// Identity attempting the release.
        requester: AddressOwner,
    },
    /// Raised when the address is not in a state allowing the transition.
    #[error("address {address} is {state}, expected {expected}")]
    InvalidTransition {
        /// Address named by the caller.
        address: IpAddr,
        /// Current state.
        state: AddressState,
        /// State required by the operation.
        expected: AddressState,
    },
}

/// Result of reconciling the reserved pool against its target.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconcileSummary {
    /// Addresses moved from the backlog into the reserved pool.
    pub activated: Vec<IpAddr>,
    /// Surplus addresses returned to the backlog.
    pub released: Vec<IpAddr>,
}

/// Pool of public addresses in a stable enumeration order.
#[derive(Debug)]
pub struct AddressPool {
    reserved_target: usize,
    addresses: Mutex<Vec<Address>>,
}

impl AddressPool {
    /// Creates a pool from explicit address records, kept in the given
    /// order.
    #[must_use]
    pub const fn new(reserved_target: usize, addresses: Vec<Address>) -> Self {
        Self {
            reserved_target,
            addresses: Mutex::new(addresses),
        }
    }

    /// Creates a pool whose addresses all start in the disabled backlog and
    /// activates as many as the target asks for.
    #[must_use]
    pub fn from_addresses(
        reserved_target: usize,
        addresses: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        let pool = Self::new(
            reserved_target,
            addresses.into_iter().map(Address::disabled).collect(),
        );
        let summary = pool.reconcile_reserved_count(&[]);
        info!(
            target = reserved_target,
            activated = summary.activated.len(),
            "initialised reserved address pool"
        );
        pool
    }

    fn addresses(&self) -> MutexGuard<'_, Vec<Address>> {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the configured reservation target.
    #[must_use]
    pub const fn reserved_target(&self) -> usize {
        self.reserved_target
    }

    /// Claims `count` free system-owned addresses for `partition`.
    ///
    /// All-or-nothing: when fewer than `count` qualify, every address marked
    /// pending by this call is reverted before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::NotEnoughResources`] when the pool is short.
    pub fn allocate(&self, partition: &str, count: usize) -> Result<Vec<Address>, AddressError> {
        let mut addresses = self.addresses();
        let mut claimed = Vec::with_capacity(count.min(addresses.len()));
        for address in addresses.iter_mut() {
            if claimed.len() == count {
                break;
            }
            if address.is_allocatable() {
                address.state = AddressState::Pending;
                address.partition = Some(partition.to_owned());
                claimed.push(address.value);
            }
        }

        if claimed.len() < count {
            for address in addresses
                .iter_mut()
                .filter(|address| claimed.contains(&address.value))
            {
                address.clear();
            }
            debug!(
                partition,
                requested = count,
                available = claimed.len(),
                "address allocation short; reverted pending claims"
            );
            return Err(AddressError::NotEnoughResources {
                partition: partition.to_owned(),
                requested: count,
                available: claimed.len(),
            });
        }

        Ok(addresses
            .iter()
            .filter(|address| claimed.contains(&address.value))
            .cloned()
            .collect())
    }

    /// Claims a single free system-owned address for `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::NotEnoughResources`] when no address is free.
    pub fn allocate_one(&self, partition: &str) -> Result<Address, AddressError> {
        let mut addresses = self.addresses();
        let address = addresses
            .iter_mut()
            .find(|address| address.is_allocatable())
            .ok_or_else(|| AddressError::NotEnoughResources {
                partition: partition.to_owned(),
                requested: 1,
                available: 0,
            })?;
        address.state = AddressState::Pending;
        address.partition = Some(partition.to_owned());
        Ok(address.clone())
    }

    fn find_mut<'a>(
        addresses: &'a mut [Address],
        value: IpAddr,
    ) -> Result<&'a mut Address, AddressError> {
        addresses
            .iter_mut()
            .find(|address| address.value == value)
            .ok_or(AddressError::AddressNotFound { address: value })
    }

    /// Binds a pending address to an instance.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::AddressNotFound`] for unknown addresses and
    /// [`AddressError::InvalidTransition`] unless the address is pending.
    pub fn assign(&self, value: IpAddr, instance_id: &str) -> Result<Address, AddressError> {
        let mut addresses = self.addresses();
        let address = Self::find_mut(&mut addresses, value)?;
        if address.state != AddressState::Pending {
            return Err(AddressError::InvalidTransition {
                address: value,
                state: address.state,
                expected: AddressState::Pending,
            });
        }
        address.state = AddressState::Assigned;
        address.instance_id = Some(instance_id.to_owned());
        Ok(address.clone())
    }

    /// Returns a pending or assigned system-owned address to the free pool.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::NotReleasable`] unless the address is
    /// system-owned and `requester` is its owner, and
    /// [`AddressError::InvalidTransition`] when the address is already free
    /// or disabled.
    pub fn release(&self, value: IpAddr, requester: &AddressOwner) -> Result<(), AddressError> {
        let mut addresses = self.addresses();
        let address = Self::find_mut(&mut addresses, value)?;
        if !address.is_system_owned() || address.owner != *requester {
            return Err(AddressError::NotReleasable {
                address: value,
                owner: address.owner.clone(),
                requester: requester.clone(),
            });
        }
        if !matches!(
            address.state,
            AddressState::Pending | AddressState::Assigned
        ) {
            return Err(AddressError::InvalidTransition {
                address: value,
                state: address.state,
                expected: AddressState::Assigned,
            });
        }
        address.clear();
        debug!(address = %value, "released address");
        Ok(())
    }

    /// Moves addresses between the backlog and the reserved pool so the
    /// reserved count approaches the target.
    ///
    /// The delta is computed from `current_reserved` and then clamped
    /// against the live reserved count inside the critical section, so a
    /// stale list can never push the pool past the target or below it.
    /// Growth stops early when the backlog runs dry. Shrinking only returns
    /// free addresses, first encountered first.
    pub fn reconcile_reserved_count(&self, current_reserved: &[Address]) -> ReconcileSummary {
        let mut addresses = self.addresses();
        let live = addresses.iter().filter(|a| a.is_system_owned()).count();
        let mut summary = ReconcileSummary::default();

        if self.reserved_target > current_reserved.len() {
            let wanted = (self.reserved_target - current_reserved.len())
                .min(self.reserved_target.saturating_sub(live));
            debug!(wanted, "activating additional reserved addresses");
            for address in addresses
                .iter_mut()
                .filter(|address| address.state == AddressState::Disabled)
                .take(wanted)
            {
                address.owner = AddressOwner::System;
                address.clear();
                summary.activated.push(address.value);
            }
            if summary.activated.len() < wanted {
                debug!(
                    wanted,
                    activated = summary.activated.len(),
                    "address backlog exhausted during reconciliation"
                );
            }
        } else {
            let surplus = (current_reserved.len() - self.reserved_target)
                .min(live.saturating_sub(self.reserved_target));
            for address in addresses
                .iter_mut()
                .filter(|address| address.is_allocatable())
                .take(surplus)
            {
                address.owner = AddressOwner::Unowned;
                address.clear();
                address.state = AddressState::Disabled;
                summary.released.push(address.value);
            }
        }

        if !summary.activated.is_empty() || !summary.released.is_empty() {
            info!(
                activated = summary.activated.len(),
                released = summary.released.len(),
                target = self.reserved_target,
                "reconciled reserved addresses"
            );
        }
        summary
    }

    /// Reconciles against the pool's own reserved list.
    pub fn reconcile(&self) -> ReconcileSummary {
        let reserved = self.list_reserved();
        self.reconcile_reserved_count(&reserved)
    }

    /// Returns every system-owned address in enumeration order.
    #[must_use]
    pub fn list_reserved(&self) -> Vec<Address> {
        self.addresses()
            .iter()
            .filter(|address| address.is_system_owned())
            .cloned()
            .collect()
    }

    /// Returns every tracked address in enumeration order.
    #[must_use]
    pub fn list(&self) -> Vec<Address> {
        self.addresses().clone()
    }

    /// Returns the record for one address.
    #[must_use]
    pub fn get(&self, value: IpAddr) -> Option<Address> {
        self.addresses()
            .iter()
            .find(|address| address.value == value)
            .cloned()
    }

    /// Returns how many system-owned addresses are free.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.addresses()
            .iter()
            .filter(|address| address.is_allocatable())
            .count()
    }

    /// Returns how many addresses sit in the disabled backlog.
    #[must_use]
    pub fn disabled_count(&self) -> usize {
        self.addresses()
            .iter()
            .filter(|address| address.state == AddressState::Disabled)
            .count()
    }
}
