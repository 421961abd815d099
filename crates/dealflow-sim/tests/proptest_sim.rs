use dealflow_sim::network::FaultConfig;
use dealflow_sim::{SimulationConfig, Simulator};
use proptest::prelude::*;

fn arb_fault() -> impl Strategy<Value = FaultConfig> {
    (0u8..=5, 0u8..=100, 0u8..=30, 0u8..=30, 0u8..=100).prop_map(
        |(max_delay_rounds, fail, lost, duplicate, reorder)| FaultConfig {
            max_delay_rounds,
            fail_rate_percent: fail,
            lost_reply_rate_percent: lost,
            duplicate_rate_percent: duplicate,
            reorder_rate_percent: reorder,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_seed_and_fault_mix_keeps_invariants(
        seed in any::<u64>(),
        items in 1usize..12,
        batch in 0u8..=40,
        fault in arb_fault(),
    ) {
        let mut sim = Simulator::new(SimulationConfig {
            seed,
            items,
            rounds: 25,
            max_drags_per_round: 4,
            batch_rate_percent: batch,
            fault,
        }).expect("sim");
        let result = sim.run().expect("run");

        prop_assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        prop_assert_eq!(result.final_board.len(), items);
        let resolved = result.stats.rolled_back + result.stats.committed + result.stats.superseded;
        prop_assert!(resolved >= result.stats.submitted);
    }
}
