use gatekeeper_core::models::AcquireMode;
use proptest::prelude::*;

/// One step of a simulated lane workload
#[derive(Debug, Clone)]
pub enum LaneStep {
    Acquire(usize),
    Release(usize),
    Cancel(usize),
}

/// Consumer indexes are drawn from a small pool so that releases and
/// repeated acquires hit existing instances
pub fn lane_step_strategy(consumers: usize) -> impl Strategy<Value = LaneStep> {
    prop_oneof![
        3 => (0..consumers).prop_map(LaneStep::Acquire),
        2 => (0..consumers).prop_map(LaneStep::Release),
        1 => (0..consumers).prop_map(LaneStep::Cancel),
    ]
}

pub fn lane_workload_strategy() -> impl Strategy<Value = Vec<LaneStep>> {
    prop::collection::vec(lane_step_strategy(12), 1..80)
}

pub fn acquire_mode_strategy() -> impl Strategy<Value = AcquireMode> {
    prop_oneof![Just(AcquireMode::Ensure), Just(AcquireMode::BestEffort)]
}

pub fn permits_strategy() -> impl Strategy<Value = u32> {
    1u32..=4
}

/// Duration groups as (amount, unit, millis per unit)
pub fn duration_group_strategy() -> impl Strategy<Value = (i64, &'static str, i64)> {
    (
        1i64..1_000,
        prop_oneof![
            Just(("w", 604_800_000i64)),
            Just(("d", 86_400_000)),
            Just(("h", 3_600_000)),
            Just(("m", 60_000)),
            Just(("s", 1_000)),
            Just(("ms", 1)),
        ],
    )
        .prop_map(|(amount, (unit, millis))| (amount, unit, millis))
}
