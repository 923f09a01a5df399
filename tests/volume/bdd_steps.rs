//! BDD step definitions for the volume lifecycle.

use quartermaster::{Caller, CreateVolumeRequest, Instance, InstanceRegistry, ProvisionOperation};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{Outcome, VolumeContext};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn runtime() -> Result<Runtime, StepError> {
    Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))
}

fn operation(name: &str) -> Result<ProvisionOperation, StepError> {
    [
        ProvisionOperation::CreateVolume,
        ProvisionOperation::DeleteVolume,
        ProvisionOperation::AttachVolume,
        ProvisionOperation::DetachVolume,
        ProvisionOperation::BindAddress,
    ]
    .into_iter()
    .find(|operation| operation.as_str() == name)
    .ok_or_else(|| StepError::Assertion(format!("unknown operation {name}")))
}

#[given("a volume service in zone \"{zone}\"")]
fn volume_service(volume_context: VolumeContext, zone: String) -> VolumeContext {
    let _ = volume_context;
    VolumeContext::with_zones(&[zone.as_str()])
}

#[given("instance \"{instance_id}\" owned by \"{owner}\" in zone \"{zone}\"")]
fn instance_in_zone(
    volume_context: VolumeContext,
    instance_id: String,
    owner: String,
    zone: String,
) -> VolumeContext {
    volume_context
        .inventory
        .insert_instance(Instance::new(instance_id, owner, zone));
    volume_context
}

#[given("the backend rejects \"{operation_name}\"")]
fn backend_rejects(
    volume_context: VolumeContext,
    operation_name: String,
) -> Result<VolumeContext, StepError> {
    volume_context.backend.fail(operation(&operation_name)?);
    Ok(volume_context)
}

#[given("account \"{account}\" has created a {size} GiB volume in zone \"{zone}\"")]
fn volume_exists(
    volume_context: VolumeContext,
    account: String,
    size: u32,
    zone: String,
) -> Result<VolumeContext, StepError> {
    let created = create(volume_context, &account, size, &zone)?;
    if created.volume.is_none() {
        return Err(StepError::Assertion(format!(
            "setup create failed: {:?}",
            created.outcome
        )));
    }
    Ok(created)
}

#[given("the volume is attached to instance \"{instance_id}\"")]
fn volume_attached(
    volume_context: VolumeContext,
    instance_id: String,
) -> Result<VolumeContext, StepError> {
    let caller = Caller::administrator("operator");
    let result = runtime()?.block_on(volume_context.manager.attach_volume(
        &caller,
        &instance_id,
        volume_context.volume_id(),
        "/dev/sdf",
    ));
    result.map_err(|err| StepError::Assertion(format!("setup attach failed: {err}")))?;
    Ok(volume_context)
}

fn create(
    volume_context: VolumeContext,
    account: &str,
    size: u32,
    zone: &str,
) -> Result<VolumeContext, StepError> {
    let request = CreateVolumeRequest::new(size, zone);
    let result = runtime()?.block_on(
        volume_context
            .manager
            .create_volume(&Caller::account(account), &request),
    );
    let outcome = Outcome::from_result(&result);
    Ok(VolumeContext {
        volume: result.ok().or(volume_context.volume.clone()),
        outcome: Some(outcome),
        ..volume_context
    })
}

#[when("account \"{account}\" creates a {size} GiB volume in zone \"{zone}\"")]
fn create_volume(
    volume_context: VolumeContext,
    account: String,
    size: u32,
    zone: String,
) -> Result<VolumeContext, StepError> {
    create(volume_context, &account, size, &zone)
}

#[when("account \"{account}\" attaches the volume to instance \"{instance_id}\" as \"{device}\"")]
fn attach_volume(
    volume_context: VolumeContext,
    account: String,
    instance_id: String,
    device: String,
) -> Result<VolumeContext, StepError> {
    let result = runtime()?.block_on(volume_context.manager.attach_volume(
        &Caller::account(account),
        &instance_id,
        volume_context.volume_id(),
        &device,
    ));
    Ok(VolumeContext {
        outcome: Some(Outcome::from_result(&result)),
        ..volume_context
    })
}

#[when("account \"{account}\" detaches the volume from instance \"{instance_id}\"")]
fn detach_volume(
    volume_context: VolumeContext,
    account: String,
    instance_id: String,
) -> Result<VolumeContext, StepError> {
    let result = runtime()?.block_on(volume_context.manager.detach_volume(
        &Caller::account(account),
        &instance_id,
        volume_context.volume_id(),
    ));
    Ok(VolumeContext {
        outcome: Some(Outcome::from_result(&result)),
        ..volume_context
    })
}

#[when("account \"{account}\" deletes the volume")]
fn delete_volume(
    volume_context: VolumeContext,
    account: String,
) -> Result<VolumeContext, StepError> {
    let result = runtime()?.block_on(
        volume_context
            .manager
            .delete_volume(&Caller::account(account), volume_context.volume_id()),
    );
    Ok(VolumeContext {
        outcome: Some(Outcome::from_result(&result)),
        ..volume_context
    })
}

#[then("the volume operation succeeds")]
fn operation_succeeds(volume_context: &VolumeContext) -> Result<(), StepError> {
    match &volume_context.outcome {
        Some(Outcome::Success) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected success, got {other:?}"
        ))),
    }
}

#[then("the volume operation fails with \"{kind}\"")]
fn operation_fails(volume_context: &VolumeContext, kind: String) -> Result<(), StepError> {
    match &volume_context.outcome {
        Some(Outcome::Failure { kind: actual, .. }) if *actual == kind => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {kind} failure, got {other:?}"
        ))),
    }
}

#[then("the stored volume count is {count}")]
fn stored_volume_count(volume_context: &VolumeContext, count: usize) -> Result<(), StepError> {
    let actual = volume_context.store.volume_count();
    if actual == count {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected {count} stored volumes, found {actual}"
    )))
}

#[then("the backend received {count} create requests")]
fn backend_create_count(volume_context: &VolumeContext, count: usize) -> Result<(), StepError> {
    let actual = volume_context.backend.calls().created.len();
    if actual == count {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected {count} create requests, backend saw {actual}"
    )))
}

#[then("instance \"{instance_id}\" holds the volume")]
fn instance_holds_volume(
    volume_context: &VolumeContext,
    instance_id: String,
) -> Result<(), StepError> {
    let holder = volume_context
        .inventory
        .find_attachment(volume_context.volume_id())
        .map(|attachment| attachment.instance_id);
    if holder.as_deref() == Some(instance_id.as_str()) {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected {instance_id} to hold the volume, holder is {holder:?}"
    )))
}

#[then("no instance holds the volume")]
fn no_instance_holds_volume(volume_context: &VolumeContext) -> Result<(), StepError> {
    match volume_context
        .inventory
        .find_attachment(volume_context.volume_id())
    {
        None => Ok(()),
        Some(attachment) => Err(StepError::Assertion(format!(
            "volume still attached to {}",
            attachment.instance_id
        ))),
    }
}
