//! BDD scenarios for the volume lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{VolumeContext, volume_context};

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Create a volume once the backend confirms"
)]
fn scenario_create_volume(volume_context: VolumeContext) {
    let _ = volume_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Reject a volume in an unknown zone"
)]
fn scenario_unknown_zone(volume_context: VolumeContext) {
    let _ = volume_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Backend rejection leaves no record"
)]
fn scenario_backend_rejection(volume_context: VolumeContext) {
    let _ = volume_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Attach a volume to an instance"
)]
fn scenario_attach_volume(volume_context: VolumeContext) {
    let _ = volume_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Detach a volume from an instance"
)]
fn scenario_detach_volume(volume_context: VolumeContext) {
    let _ = volume_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Refuse to delete an attached volume"
)]
fn scenario_delete_attached(volume_context: VolumeContext) {
    let _ = volume_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Hide volumes from other accounts"
)]
fn scenario_foreign_delete(volume_context: VolumeContext) {
    let _ = volume_context;
}
