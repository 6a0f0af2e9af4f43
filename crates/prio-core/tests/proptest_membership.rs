use proptest::prelude::*;

use prio_core::{
    Dispatch, GatewayError, ItemId, ListModel, ListName, OverlapPolicy, Outcome,
    RecordingNotifier, SyncConfig, SyncController,
};

const ITEMS: usize = 6;

#[derive(Debug, Clone)]
enum Action {
    Toggle(usize),
    Reorder { untracked: bool, rotate: usize, reverse: bool },
    Settle { pick: usize, ok: bool },
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0..ITEMS).prop_map(Action::Toggle),
        (any::<bool>(), 0..ITEMS, any::<bool>()).prop_map(|(untracked, rotate, reverse)| {
            Action::Reorder { untracked, rotate, reverse }
        }),
        (0..16_usize, any::<bool>()).prop_map(|(pick, ok)| Action::Settle { pick, ok }),
    ]
}

fn arb_policy() -> impl Strategy<Value = OverlapPolicy> {
    prop_oneof![
        Just(OverlapPolicy::Queue),
        Just(OverlapPolicy::Reject),
        Just(OverlapPolicy::Concurrent),
    ]
}

fn prioritized() -> ListName {
    ListName::from("prioritized")
}

fn other() -> ListName {
    ListName::from("other")
}

fn setup(split: usize, overlap: OverlapPolicy) -> SyncController<RecordingNotifier> {
    let all: Vec<ItemId> = (0..ITEMS as u64).map(ItemId::from).collect();
    let (p, o) = all.split_at(split.min(ITEMS));
    let model = ListModel::new([(prioritized(), p.to_vec()), (other(), o.to_vec())])
        .expect("model");
    let config = SyncConfig {
        overlap,
        ..SyncConfig::default()
    };
    SyncController::new(model, RecordingNotifier::new(), config)
}

struct Harness {
    ctl: SyncController<RecordingNotifier>,
    in_flight: Vec<Dispatch>,
    rolled_back: usize,
}

impl Harness {
    fn settle(&mut self, index: usize, ok: bool) {
        let dispatch = self.in_flight.remove(index);
        let result = if ok {
            Ok(())
        } else {
            Err(GatewayError::Network("dropped".into()))
        };
        let settlement = self.ctl.settle(dispatch.op, result).expect("in-flight op settles");
        if settlement.outcome == Outcome::RolledBack {
            self.rolled_back += 1;
        }
        self.in_flight.extend(settlement.dispatches);
    }

    fn apply(&mut self, action: &Action) {
        let outcome = match action {
            Action::Toggle(index) => {
                let item = ItemId::from(*index as u64);
                self.ctl.toggle_membership(&item, None)
            }
            Action::Reorder { untracked, rotate, reverse } => {
                let list = if *untracked { other() } else { prioritized() };
                let mut order = self.ctl.sorted_ids(&list).expect("ids");
                if !order.is_empty() {
                    let len = order.len();
                    order.rotate_left(rotate % len);
                }
                if *reverse {
                    order.reverse();
                }
                self.ctl.reorder_list(&list, order)
            }
            Action::Settle { pick, ok } => {
                if !self.in_flight.is_empty() {
                    let index = pick % self.in_flight.len();
                    self.settle(index, *ok);
                }
                return;
            }
        };
        match outcome {
            Ok(command) => self.in_flight.extend(command.dispatches),
            Err(err) => assert!(!err.is_programming_error(), "unexpected {err}"),
        }
    }
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn membership_stays_unique(
        split in 0..=ITEMS,
        overlap in arb_policy(),
        actions in prop::collection::vec(arb_action(), 0..40),
    ) {
        let mut harness = Harness { ctl: setup(split, overlap), in_flight: Vec::new(), rolled_back: 0 };
        for action in &actions {
            harness.apply(action);
            prop_assert!(harness.ctl.model().check_invariants().is_ok());
            prop_assert!(harness.ctl.confirmed().check_invariants().is_ok());
            prop_assert_eq!(harness.ctl.model().item_count(), ITEMS);
        }

        while !harness.in_flight.is_empty() {
            harness.settle(0, true);
        }

        prop_assert!(harness.ctl.is_idle());
        prop_assert_eq!(harness.ctl.notifier().failure_count(), harness.rolled_back);
        prop_assert_eq!(harness.ctl.model(), harness.ctl.confirmed());
    }

    #[test]
    fn failed_latest_reorder_restores_order(split in 1..=ITEMS, rotate in 1..ITEMS) {
        let mut ctl = setup(split, OverlapPolicy::Queue);
        let before = ctl.sorted_ids(&prioritized()).expect("ids");
        let mut order = before.clone();
        let len = order.len();
        order.rotate_left(rotate % len);

        let command = ctl.reorder_list(&prioritized(), order).expect("reorder");
        for dispatch in command.dispatches {
            ctl.settle(dispatch.op, Err(GatewayError::Network("down".into()))).expect("settle");
        }
        prop_assert_eq!(ctl.sorted_ids(&prioritized()).expect("ids"), before);
    }
}
