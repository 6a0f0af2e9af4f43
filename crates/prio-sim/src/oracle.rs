//! Post-run invariant checks.

use std::collections::BTreeSet;
use std::fmt;

use prio_core::{ItemId, ListModel, ListName};
use serde::Serialize;

// ── Core result types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// A model holds an item in two lists, or twice in one.
    DuplicateMembership { model: String, detail: String },

    /// After the final drain the UI and server disagree on a list.
    Divergence {
        list: ListName,
        ui: Vec<ItemId>,
        server: Vec<ItemId>,
    },

    /// Rolled-back operations and failure notifications differ in count.
    NotificationMismatch { rolled_back: usize, notified: usize },

    /// Requests were still pending after the drain.
    NotQuiescent { pending: usize },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateMembership { model, detail } => {
                write!(f, "DuplicateMembership: {model} model: {detail}")
            }
            Self::Divergence { list, ui, server } => {
                write!(f, "Divergence: list {list} ui={ui:?} server={server:?}")
            }
            Self::NotificationMismatch {
                rolled_back,
                notified,
            } => write!(
                f,
                "NotificationMismatch: {rolled_back} rollbacks but {notified} failure notifications"
            ),
            Self::NotQuiescent { pending } => {
                write!(f, "NotQuiescent: {pending} operations still pending")
            }
        }
    }
}

/// Everything the oracle needs from a finished run.
#[derive(Debug, Clone, Copy)]
pub struct FinalState<'a> {
    pub ui: &'a ListModel,
    pub server: &'a ListModel,
    pub rolled_back: usize,
    pub notified_failures: usize,
    pub pending: usize,
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Invariants checked after a simulation run:
///
/// 1. **Membership** (`check_membership`): every item in exactly one list, in
///    both the UI and server models.
/// 2. **Convergence** (`check_convergence`): UI equals server on every list,
///    under every overlap policy.
/// 3. **Failure accounting** (`check_notifications`): one failure
///    notification per rolled-back operation.
/// 4. **Quiescence** (`check_quiescent`): nothing left pending.
pub struct SyncOracle;

impl SyncOracle {
    #[must_use]
    pub fn check_all(state: &FinalState<'_>) -> OracleResult {
        Self::check_membership("ui", state.ui)
            .merge(Self::check_membership("server", state.server))
            .merge(Self::check_notifications(state.rolled_back, state.notified_failures))
            .merge(Self::check_quiescent(state.pending))
            .merge(Self::check_convergence(state.ui, state.server))
    }

    #[must_use]
    pub fn check_membership(name: &str, model: &ListModel) -> OracleResult {
        match model.check_invariants() {
            Ok(()) => OracleResult::pass(),
            Err(err) => OracleResult::from_violations(vec![InvariantViolation::DuplicateMembership {
                model: name.to_string(),
                detail: err.to_string(),
            }]),
        }
    }

    #[must_use]
    pub fn check_convergence(ui: &ListModel, server: &ListModel) -> OracleResult {
        let ui_lists = ui.to_map();
        let server_lists = server.to_map();
        let lists: BTreeSet<&ListName> = ui_lists.keys().chain(server_lists.keys()).collect();
        let violations = lists
            .into_iter()
            .filter_map(|list| {
                let left = ui_lists.get(list).cloned().unwrap_or_default();
                let right = server_lists.get(list).cloned().unwrap_or_default();
                (left != right).then(|| InvariantViolation::Divergence {
                    list: list.clone(),
                    ui: left,
                    server: right,
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_notifications(rolled_back: usize, notified: usize) -> OracleResult {
        if rolled_back == notified {
            OracleResult::pass()
        } else {
            OracleResult::from_violations(vec![InvariantViolation::NotificationMismatch {
                rolled_back,
                notified,
            }])
        }
    }

    #[must_use]
    pub fn check_quiescent(pending: usize) -> OracleResult {
        if pending == 0 {
            OracleResult::pass()
        } else {
            OracleResult::from_violations(vec![InvariantViolation::NotQuiescent { pending }])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(p: &[&str], o: &[&str]) -> ListModel {
        ListModel::new([
            (ListName::from("prioritized"), p.iter().map(|id| ItemId::from(*id)).collect()),
            (ListName::from("other"), o.iter().map(|id| ItemId::from(*id)).collect()),
        ])
        .expect("model")
    }

    #[test]
    fn identical_models_pass() {
        let ui = model(&["a", "b"], &["x"]);
        let server = ui.clone();
        let state = FinalState {
            ui: &ui,
            server: &server,
            rolled_back: 2,
            notified_failures: 2,
            pending: 0,
        };
        let result = SyncOracle::check_all(&state);
        assert!(result.passed, "{:?}", result.violations);
    }

    #[test]
    fn divergence_reports_each_list_once() {
        let ui = model(&["a", "b"], &["x"]);
        let server = model(&["b", "a"], &["x"]);
        let result = SyncOracle::check_convergence(&ui, &server);
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 1);
        assert!(result.violations[0].to_string().starts_with("Divergence: list prioritized"));
    }

    #[test]
    fn concurrent_policy_still_checks_convergence() {
        let ui = model(&["a", "b"], &["x"]);
        let server = model(&["b", "a"], &["x"]);
        let state = FinalState {
            ui: &ui,
            server: &server,
            rolled_back: 0,
            notified_failures: 0,
            pending: 0,
        };
        let result = SyncOracle::check_all(&state);
        assert!(!result.passed);
        assert!(matches!(result.violations[0], InvariantViolation::Divergence { .. }));
    }

    #[test]
    fn accounting_and_quiescence_failures_accumulate() {
        let ui = model(&["a"], &[]);
        let state = FinalState {
            ui: &ui,
            server: &ui,
            rolled_back: 1,
            notified_failures: 2,
            pending: 3,
        };
        let result = SyncOracle::check_all(&state);
        assert_eq!(
            result.violations,
            vec![
                InvariantViolation::NotificationMismatch {
                    rolled_back: 1,
                    notified: 2
                },
                InvariantViolation::NotQuiescent { pending: 3 },
            ]
        );
    }
}
