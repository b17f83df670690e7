//! Property-based tests for weighing and admission planning.

use netsched::admission::{plan_admission, InFlight};
use netsched::priority::{is_required, weighing};
use netsched::queue::WeighedRequest;
use netsched::{Budget, RequestId, RequestPriority};
use proptest::prelude::*;
use std::time::Duration;

fn any_priority() -> impl Strategy<Value = RequestPriority> {
    prop_oneof![
        Just(RequestPriority::Low),
        Just(RequestPriority::Normal),
        Just(RequestPriority::High),
        Just(RequestPriority::Required),
    ]
}

fn any_budget() -> impl Strategy<Value = Budget> {
    prop_oneof![
        Just(Budget::Unbounded),
        (0u64..10_000).prop_map(Budget::Bytes),
    ]
}

/// Snapshot entries whose identity encodes their estimated size.
fn any_snapshot() -> impl Strategy<Value = Vec<WeighedRequest>> {
    proptest::collection::vec((0u64..8000, 1u64..2000), 0..40).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (weighing, size))| WeighedRequest {
                id: RequestId(i as u64),
                identity: size.to_string(),
                weighing,
                seq: i as u64,
            })
            .collect()
    })
}

fn in_flight(requests: usize, traffic: u64) -> InFlight {
    InFlight { requests, traffic }
}

fn size_of(identity: &str) -> u64 {
    identity.parse().unwrap_or(1024)
}

proptest! {
    #[test]
    fn prop_weighing_monotone_in_wait(
        priority in any_priority(),
        a in 0u64..120_000,
        b in 0u64..120_000,
    ) {
        let (shorter, longer) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(
            weighing(priority, Duration::from_millis(shorter))
                <= weighing(priority, Duration::from_millis(longer))
        );
    }

    #[test]
    fn prop_every_tier_required_within_31s(priority in any_priority()) {
        prop_assert!(is_required(weighing(priority, Duration::from_secs(31))));
    }

    #[test]
    fn prop_higher_tier_never_weighs_less(
        waited in 0u64..60_000,
    ) {
        let waited = Duration::from_millis(waited);
        let tiers = [
            RequestPriority::Low,
            RequestPriority::Normal,
            RequestPriority::High,
            RequestPriority::Required,
        ];
        for pair in tiers.windows(2) {
            prop_assert!(weighing(pair[0], waited) < weighing(pair[1], waited));
        }
    }

    #[test]
    fn prop_required_always_dispatched(
        snapshot in any_snapshot(),
        requests in 0usize..4,
        active in 0u64..5000,
        budget in any_budget(),
    ) {
        let required: Vec<RequestId> = snapshot
            .iter()
            .filter(|r| is_required(r.weighing))
            .map(|r| r.id)
            .collect();
        let plan = plan_admission(snapshot, in_flight(requests, active), budget, size_of);
        prop_assert_eq!(plan.required.len(), required.len());
        for id in required {
            prop_assert!(plan.required.contains(&id));
        }
    }

    #[test]
    fn prop_admitted_fit_budget(
        snapshot in any_snapshot(),
        requests in 1usize..4,
        active in 0u64..5000,
        limit in 0u64..10_000,
    ) {
        // something is in flight, so nothing bypasses the budget
        let plan = plan_admission(
            snapshot.clone(),
            in_flight(requests, active),
            Budget::Bytes(limit),
            size_of,
        );

        let required_traffic: u64 = snapshot
            .iter()
            .filter(|r| plan.required.contains(&r.id))
            .map(|r| size_of(&r.identity))
            .sum();
        let admitted_traffic: u64 = snapshot
            .iter()
            .filter(|r| plan.admitted.contains(&r.id))
            .map(|r| size_of(&r.identity))
            .sum();

        prop_assert_eq!(plan.traffic, active + required_traffic + admitted_traffic);
        if !plan.admitted.is_empty() {
            prop_assert!(plan.traffic <= limit);
        }
    }

    #[test]
    fn prop_admitted_is_a_prefix_of_the_ranking(
        snapshot in any_snapshot(),
        requests in 0usize..4,
        active in 0u64..5000,
        budget in any_budget(),
    ) {
        let mut ranked: Vec<WeighedRequest> = snapshot
            .iter()
            .filter(|r| !is_required(r.weighing))
            .cloned()
            .collect();
        ranked.sort_by(|a, b| b.weighing.cmp(&a.weighing).then(a.seq.cmp(&b.seq)));

        let plan = plan_admission(snapshot, in_flight(requests, active), budget, size_of);
        let prefix: Vec<RequestId> = ranked.iter().take(plan.admitted.len()).map(|r| r.id).collect();
        prop_assert_eq!(plan.admitted, prefix);
    }
}
