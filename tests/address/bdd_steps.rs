//! BDD step definitions for the address pool.

use std::sync::Arc;

use quartermaster::{
    AddressAssignmentCoordinator, AddressPool, AddressState, BindingEvent, Instance,
    InstanceRegistry, ProvisionOperation,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{AddressContext, addresses};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn expect_count(label: &str, actual: usize, expected: usize) -> Result<(), StepError> {
    if actual == expected {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected {expected} {label} addresses, found {actual}"
    )))
}

#[given("an address pool of {total} addresses with {reserved} reserved")]
fn address_pool(address_context: AddressContext, total: u8, reserved: usize) -> AddressContext {
    let _ = address_context;
    AddressContext::with_pool(AddressPool::from_addresses(reserved, addresses(total)))
}

#[given("{count} addresses were allocated in partition \"{partition}\"")]
fn addresses_allocated(
    address_context: AddressContext,
    count: usize,
    partition: String,
) -> Result<AddressContext, StepError> {
    address_context
        .pool
        .allocate(&partition, count)
        .map_err(|err| StepError::Assertion(format!("setup allocation failed: {err}")))?;
    Ok(address_context)
}

#[given("instance \"{instance_id}\" runs in partition \"{partition}\"")]
fn instance_running(
    address_context: AddressContext,
    instance_id: String,
    partition: String,
) -> AddressContext {
    address_context
        .inventory
        .insert_instance(Instance::new(instance_id, "alice", partition));
    address_context
}

#[given("the backend rejects address bindings")]
fn bindings_rejected(address_context: AddressContext) -> AddressContext {
    address_context.backend.fail(ProvisionOperation::BindAddress);
    address_context
}

#[when("{count} addresses are allocated in partition \"{partition}\"")]
fn allocate(address_context: AddressContext, count: usize, partition: String) -> AddressContext {
    let allocation = address_context
        .pool
        .allocate(&partition, count)
        .map(|claimed| claimed.len());
    AddressContext {
        allocation: Some(allocation),
        ..address_context
    }
}

#[when("the reservation target becomes {target}")]
fn retarget(address_context: AddressContext, target: usize) -> AddressContext {
    let pool = AddressPool::new(target, address_context.pool.list());
    pool.reconcile();
    AddressContext {
        pool: Arc::new(pool),
        ..address_context
    }
}

#[when("an address is assigned to instance \"{instance_id}\"")]
fn assign(
    address_context: AddressContext,
    instance_id: String,
) -> Result<AddressContext, StepError> {
    let instance = address_context
        .inventory
        .lookup_instance(&instance_id)
        .ok_or_else(|| StepError::Assertion(format!("no instance {instance_id}")))?;
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let coordinator = AddressAssignmentCoordinator::new(
        Arc::clone(&address_context.pool),
        Arc::new(address_context.backend.clone()),
        Arc::clone(&address_context.inventory),
        runtime.handle().clone(),
    );
    let task = coordinator
        .assign(&instance)
        .map_err(|err| StepError::Assertion(format!("assignment failed: {err}")))?;
    let event = runtime.block_on(task.wait());
    Ok(AddressContext {
        binding: Some(event),
        ..address_context
    })
}

#[then("the allocation fails for lack of addresses")]
fn allocation_short(address_context: &AddressContext) -> Result<(), StepError> {
    match &address_context.allocation {
        Some(Err(quartermaster::AddressError::NotEnoughResources { .. })) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected NotEnoughResources, got {other:?}"
        ))),
    }
}

#[then("the free address count is {count}")]
fn free_count(address_context: &AddressContext, count: usize) -> Result<(), StepError> {
    expect_count("free", address_context.pool.free_count(), count)
}

#[then("the pending address count is {count}")]
fn pending_count(address_context: &AddressContext, count: usize) -> Result<(), StepError> {
    expect_count("pending", address_context.count(AddressState::Pending), count)
}

#[then("the assigned address count is {count}")]
fn assigned_count(address_context: &AddressContext, count: usize) -> Result<(), StepError> {
    expect_count("assigned", address_context.count(AddressState::Assigned), count)
}

#[then("the disabled address count is {count}")]
fn disabled_count(address_context: &AddressContext, count: usize) -> Result<(), StepError> {
    expect_count("disabled", address_context.pool.disabled_count(), count)
}

#[then("the reserved address count is {count}")]
fn reserved_count(address_context: &AddressContext, count: usize) -> Result<(), StepError> {
    expect_count("reserved", address_context.pool.list_reserved().len(), count)
}

#[then("the binding completes")]
fn binding_completes(address_context: &AddressContext) -> Result<(), StepError> {
    match &address_context.binding {
        Some(BindingEvent::Bound { .. }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a bound address, got {other:?}"
        ))),
    }
}

#[then("the binding fails")]
fn binding_fails(address_context: &AddressContext) -> Result<(), StepError> {
    match &address_context.binding {
        Some(BindingEvent::Failed { .. }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a failed binding, got {other:?}"
        ))),
    }
}

#[then("instance \"{instance_id}\" has a public address")]
fn has_public_address(
    address_context: &AddressContext,
    instance_id: String,
) -> Result<(), StepError> {
    let public = address_context
        .inventory
        .lookup_instance(&instance_id)
        .and_then(|instance| instance.public_address);
    let bound = match &address_context.binding {
        Some(BindingEvent::Bound { address, .. }) => Some(*address),
        _ => None,
    };
    if public.is_some() && public == bound {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected {instance_id} at {bound:?}, found {public:?}"
    )))
}

#[then("instance \"{instance_id}\" has no public address")]
fn has_no_public_address(
    address_context: &AddressContext,
    instance_id: String,
) -> Result<(), StepError> {
    let public = address_context
        .inventory
        .lookup_instance(&instance_id)
        .and_then(|instance| instance.public_address);
    match public {
        None => Ok(()),
        Some(address) => Err(StepError::Assertion(format!(
            "{instance_id} unexpectedly reachable at {address}"
        ))),
    }
}
