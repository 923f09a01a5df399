//! BDD scenarios for the address pool.

use rstest_bdd_macros::scenario;

use super::test_helpers::{AddressContext, address_context};

#[scenario(path = "tests/features/address_pool.feature", name = "Allocation is all or nothing")]
fn scenario_all_or_nothing(address_context: AddressContext) {
    let _ = address_context;
}

#[scenario(path = "tests/features/address_pool.feature", name = "Allocation marks claimed addresses pending")]
fn scenario_marks_pending(address_context: AddressContext) {
    let _ = address_context;
}

#[scenario(path = "tests/features/address_pool.feature", name = "Raising the target activates backlog addresses")]
fn scenario_raise_target(address_context: AddressContext) {
    let _ = address_context;
}

#[scenario(path = "tests/features/address_pool.feature", name = "Raising the target past the backlog stops at the backlog")]
fn scenario_raise_past_backlog(address_context: AddressContext) {
    let _ = address_context;
}

#[scenario(path = "tests/features/address_pool.feature", name = "Lowering the target releases only free addresses")]
fn scenario_lower_target(address_context: AddressContext) {
    let _ = address_context;
}

#[scenario(path = "tests/features/address_pool.feature", name = "Binding updates the instance once confirmed")]
fn scenario_binding_confirmed(address_context: AddressContext) {
    let _ = address_context;
}

#[scenario(path = "tests/features/address_pool.feature", name = "Failed binding leaves the address assigned")]
fn scenario_binding_failed(address_context: AddressContext) {
    let _ = address_context;
}
