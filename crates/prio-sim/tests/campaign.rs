//! Simulation campaigns across overlap policies.
//!
//! After the final drain the UI must match the server exactly under every
//! policy, whatever faults hit the network and however requests on different
//! lists interleave.

use prio_core::{ListName, OverlapPolicy};
use prio_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use prio_sim::{SimulationConfig, Simulator, TraceEventKind};

fn faulty(overlap: OverlapPolicy, seeds: std::ops::Range<u64>) -> CampaignConfig {
    CampaignConfig {
        seed_range: seeds,
        overlap,
        fault_max_delay: 3,
        fault_drop_percent: 15,
        fault_duplicate_percent: 10,
        fault_reorder_percent: 20,
        fault_server_error_percent: 15,
        ..CampaignConfig::default()
    }
}

#[test]
fn queue_policy_converges_on_every_seed() {
    let report = run_campaign(&faulty(OverlapPolicy::Queue, 0..200)).expect("campaign");
    assert_eq!(report.seeds_run, 200);
    assert!(
        report.all_passed(),
        "first failure at seed {:?}: {:?}",
        report.first_failure,
        report.failures.first()
    );
    assert!(report.interesting_states_reached > 0);
}

#[test]
fn reject_policy_converges_on_every_seed() {
    let report = run_campaign(&faulty(OverlapPolicy::Reject, 0..100)).expect("campaign");
    assert!(report.all_passed(), "{:?}", report.failures.first());
}

#[test]
fn concurrent_policy_converges_on_every_seed() {
    let report = run_campaign(&faulty(OverlapPolicy::Concurrent, 0..100)).expect("campaign");
    assert!(report.all_passed(), "{:?}", report.failures.first());
}

#[test]
fn campaigns_reorder_both_lists() {
    let config = faulty(OverlapPolicy::Queue, 0..20);
    let untracked = ListName::from(prio_sim::OTHER);
    let reorders_of_other: usize = config
        .seed_range
        .clone()
        .map(|seed| {
            let trace = replay_seed(seed, &config).expect("replay");
            trace
                .result
                .trace
                .iter()
                .filter(|event| {
                    matches!(&event.kind, TraceEventKind::Reorder { list, op: Some(_), .. } if *list == untracked)
                })
                .count()
        })
        .sum();
    assert!(reorders_of_other > 0);
}

#[test]
fn reject_policy_refuses_some_commands() {
    let config = faulty(OverlapPolicy::Reject, 0..20);
    let refused: usize = config
        .seed_range
        .clone()
        .map(|seed| replay_seed(seed, &config).expect("replay").result.stats.refused)
        .sum();
    assert!(refused > 0);
}

#[test]
fn replay_is_deterministic() {
    let config = faulty(OverlapPolicy::Concurrent, 0..1);
    let first = replay_seed(7, &config).expect("replay 1");
    let second = replay_seed(7, &config).expect("replay 2");

    assert_eq!(first.result, second.result);
    assert_eq!(first.oracle, second.oracle);
    assert!(!first.result.trace.is_empty());
}

#[test]
fn different_seeds_produce_different_traces() {
    let config = faulty(OverlapPolicy::Queue, 0..1);
    let a = replay_seed(1, &config).expect("replay a");
    let b = replay_seed(2, &config).expect("replay b");
    assert_ne!(a.result.trace, b.result.trace);
}

#[test]
fn every_rollback_is_preceded_by_a_failed_send() {
    let config = SimulationConfig {
        seed: 99,
        rounds: 40,
        ..SimulationConfig::default()
    };
    let result = Simulator::new(config).expect("sim").run().expect("run");
    let failed_sends = result
        .trace
        .iter()
        .filter(|event| {
            matches!(
                &event.kind,
                TraceEventKind::Send { verdict, .. }
                    if *verdict != prio_sim::network::Verdict::Apply
            )
        })
        .count();
    assert!(result.stats.rolled_back <= failed_sends);
    assert_eq!(result.notified_failures, result.stats.rolled_back);
}
