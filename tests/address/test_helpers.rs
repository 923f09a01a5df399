//! Shared fixtures for address pool scenarios.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use quartermaster::test_support::ScriptedProvisioner;
use quartermaster::{AddressError, AddressPool, AddressState, BindingEvent, MemoryInventory};
use rstest::fixture;

#[derive(Clone, Debug)]
pub struct AddressContext {
    pub pool: Arc<AddressPool>,
    pub backend: ScriptedProvisioner,
    pub inventory: Arc<MemoryInventory>,
    pub allocation: Option<Result<usize, AddressError>>,
    pub binding: Option<BindingEvent>,
}

impl AddressContext {
    pub fn with_pool(pool: AddressPool) -> Self {
        Self {
            pool: Arc::new(pool),
            backend: ScriptedProvisioner::new(),
            inventory: Arc::new(MemoryInventory::default()),
            allocation: None,
            binding: None,
        }
    }

    pub fn count(&self, state: AddressState) -> usize {
        self.pool
            .list()
            .iter()
            .filter(|address| address.state == state)
            .count()
    }
}

/// Addresses drawn from the documentation range, in enumeration order.
pub fn addresses(total: u8) -> impl Iterator<Item = IpAddr> {
    (1..=total).map(|last| IpAddr::V4(Ipv4Addr::new(192, 0, 2, last)))
}

#[fixture]
pub fn address_context() -> AddressContext {
    AddressContext::with_pool(AddressPool::from_addresses(0, addresses(0)))
}
