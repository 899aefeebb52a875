use proptest::prelude::*;

use ndrsim::config::DeviceConfig;
use ndrsim::device::Device;
use ndrsim::isa::{InstKind, SyntheticProgram};
use ndrsim::memory::FixedLatencyMemory;
use ndrsim::ndrange::{Dim3, NDRange, WorkGroupStatus};
use ndrsim::scheduler::PlacementPolicy;
use ndrsim::trace::{Action, VecSink};

const WAVEFRONT: u32 = 16;

fn inst_kind() -> impl Strategy<Value = InstKind> {
    prop_oneof![Just(InstKind::Alu), Just(InstKind::Load), Just(InstKind::Store)]
}

fn placement() -> impl Strategy<Value = PlacementPolicy> {
    prop_oneof![Just(PlacementPolicy::FirstIdle), Just(PlacementPolicy::RoundRobin)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_work_group_runs_once_and_finishes(
        cus in 1usize..6,
        lanes_log2 in 0u32..5,
        groups in 1u32..12,
        local in 1u32..64,
        program in prop::collection::vec(inst_kind(), 0..4),
        latency in 0u64..20,
        policy in placement(),
    ) {
        let config = DeviceConfig::new(cus, 1 << lanes_log2)
            .with_wavefront_size(WAVEFRONT)
            .with_placement(policy);
        let mut device = Device::new(config)
            .unwrap()
            .with_isa(Box::new(SyntheticProgram::new(program.clone())))
            .with_memory(Box::new(FixedLatencyMemory::new(latency)))
            .with_trace(VecSink::new());
        let mut nd = NDRange::new(0, "prop", Dim3::x(groups * local), Dim3::x(local), WAVEFRONT).unwrap();

        let stats = device.run(&mut nd).unwrap();

        prop_assert!(nd.all_done());
        prop_assert!(nd.work_groups.iter().all(|wg| wg.status == WorkGroupStatus::Done));
        prop_assert_eq!(device.busy_count(), 0);
        prop_assert_eq!(device.idle_count(), cus);

        let wavefronts = groups as u64 * local.div_ceil(WAVEFRONT) as u64;
        prop_assert_eq!(stats.instructions_retired, wavefronts * (program.len() as u64 + 1));

        // FIFO: dispatch order is submission order, each group exactly once
        let dispatched: Vec<usize> = device.trace().of_action(Action::Run).map(|e| e.work_group).collect();
        prop_assert_eq!(dispatched, (0..groups as usize).collect::<Vec<_>>());
    }

    #[test]
    fn pools_partition_units_at_every_cycle(
        cus in 1usize..4,
        groups in 1u32..8,
        local in 1u32..48,
        latency in 0u64..8,
    ) {
        let mut device = Device::new(DeviceConfig::new(cus, 4).with_wavefront_size(WAVEFRONT))
            .unwrap()
            .with_isa(Box::new(SyntheticProgram::new(vec![InstKind::Load, InstKind::Alu])))
            .with_memory(Box::new(FixedLatencyMemory::new(latency)));
        let mut nd = NDRange::new(0, "prop", Dim3::x(groups * local), Dim3::x(local), WAVEFRONT).unwrap();

        while !device.run_for(&mut nd, 1).unwrap().is_completed() {
            prop_assert!(device.invariant_violations(&nd).is_empty());
            prop_assert!(device.cycle() < 100_000);
        }
        prop_assert!(nd.all_done());
    }
}
