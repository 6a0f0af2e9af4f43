//! Optimistic sync controller.
//!
//! The controller owns two models. `confirmed` holds what the server has
//! acknowledged; the view model is `confirmed` with the intent of every live
//! pending operation replayed on top, in issue order. Commands mutate the view
//! at once and hand back the gateway requests to send; [`SyncController::settle`]
//! folds a response into `confirmed` or, on failure, rebuilds the view from
//! `confirmed` and the operations still pending.
//!
//! The controller never performs I/O. A driver (see [`crate::session`]) sends
//! each [`Dispatch`] and reports the result back through `settle`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::{OverlapPolicy, SyncConfig};
use crate::error::{GatewayError, ModelError, SyncError};
use crate::gateway::GatewayRequest;
use crate::model::{ItemId, ListModel, ListName, ListSnapshot};
use crate::view::ViewNotifier;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Identifier of one pending operation, unique per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OpId(u64);

impl OpId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Reorder,
    Add,
    Remove,
}

/// What the user asked for, replayable on any model.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Intent {
    Reorder { list: ListName, order: Vec<ItemId> },
    Move { item: ItemId, to: ListName },
}

impl Intent {
    fn apply(&self, model: &mut ListModel) {
        let result = match self {
            Self::Reorder { list, order } => model.reorder_reconciled(list, order).map(|_| ()),
            Self::Move { item, to } => match model.list_of(item).cloned() {
                Some(from) if &from != to => model.move_item(item, &from, to, None).map(|_| ()),
                _ => Ok(()),
            },
        };
        if let Err(err) = result {
            trace!(error = %err, "intent skipped during replay");
        }
    }
}

/// Which gateway call an operation resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    PersistOrder(ListName),
    AddMembership(ItemId, ListName),
    RemoveMembership(ItemId, ListName),
}

impl Route {
    const fn lane(&self) -> &ListName {
        match self {
            Self::PersistOrder(list) | Self::AddMembership(_, list) | Self::RemoveMembership(_, list) => {
                list
            }
        }
    }

    /// Whether a successful `self` makes the server state written by an
    /// earlier `other` irrelevant.
    fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::PersistOrder(list), Self::PersistOrder(earlier))
            | (Self::PersistOrder(list), Self::RemoveMembership(_, earlier)) => list == earlier,
            (
                Self::AddMembership(item, _) | Self::RemoveMembership(item, _),
                Self::AddMembership(earlier, _) | Self::RemoveMembership(earlier, _),
            ) => item == earlier,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Queued,
    InFlight,
}

/// A command whose request has not settled yet.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    id: OpId,
    kind: OperationKind,
    items: Vec<ItemId>,
    intent: Intent,
    route: Route,
    before: Vec<ListSnapshot>,
    stage: Stage,
    sent: Option<GatewayRequest>,
    superseded: bool,
}

impl PendingOperation {
    #[must_use]
    pub const fn id(&self) -> OpId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn affected_items(&self) -> &[ItemId] {
        &self.items
    }

    /// The touched lists as they were just before the optimistic mutation.
    #[must_use]
    pub fn snapshots(&self) -> &[ListSnapshot] {
        &self.before
    }

    #[must_use]
    pub const fn lane(&self) -> &ListName {
        self.route.lane()
    }

    /// The request as sent, or `None` while queued.
    #[must_use]
    pub const fn request(&self) -> Option<&GatewayRequest> {
        self.sent.as_ref()
    }

    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self.stage, Stage::InFlight)
    }

    /// A later successful request overwrote whatever this one writes.
    #[must_use]
    pub const fn is_superseded(&self) -> bool {
        self.superseded
    }

    fn touches(&self, list: &ListName) -> bool {
        self.route.lane() == list || self.before.iter().any(|snap| snap.list() == list)
    }
}

// ---------------------------------------------------------------------------
// Command results
// ---------------------------------------------------------------------------

/// A request the driver must send, tagged with the operation to settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    pub op: OpId,
    pub request: GatewayRequest,
}

/// Result of a command. `op` is `None` when the command was a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub op: Option<OpId>,
    pub dispatches: Vec<Dispatch>,
}

impl Command {
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.op.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The server accepted the request; `confirmed` now includes it.
    Committed,
    /// The request failed; the view was rebuilt and the failure surfaced.
    RolledBack,
    /// A later request already covered this one. A failure is swallowed; a
    /// late success is absorbed into the confirmed model without a failure
    /// notification.
    Superseded,
}

/// Result of [`SyncController::settle`]. `dispatches` holds requests released
/// from the lane queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub op: OpId,
    pub outcome: Outcome,
    pub dispatches: Vec<Dispatch>,
}

/// Per-list synchronization phase as seen between calls. Compensation runs
/// inside [`SyncController::settle`] and is only visible in `trace` logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListPhase {
    Idle,
    Mutating,
}

// ---------------------------------------------------------------------------
// SyncController
// ---------------------------------------------------------------------------

pub struct SyncController<N> {
    view: ListModel,
    confirmed: ListModel,
    notifier: N,
    config: SyncConfig,
    pending: BTreeMap<OpId, PendingOperation>,
    next_op: u64,
}

impl<N: ViewNotifier> SyncController<N> {
    /// Start from server-rendered state; `model` is taken as confirmed.
    #[must_use]
    pub fn new(model: ListModel, notifier: N, config: SyncConfig) -> Self {
        Self {
            confirmed: model.clone(),
            view: model,
            notifier,
            config,
            pending: BTreeMap::new(),
            next_op: 1,
        }
    }

    /// The optimistic model the view renders.
    #[must_use]
    pub const fn model(&self) -> &ListModel {
        &self.view
    }

    /// The model as last acknowledged by the server.
    #[must_use]
    pub const fn confirmed(&self) -> &ListModel {
        &self.confirmed
    }

    #[must_use]
    pub const fn notifier(&self) -> &N {
        &self.notifier
    }

    pub const fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Ids of `list` in the view, in order.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` was never declared.
    pub fn sorted_ids(&self, list: &ListName) -> Result<Vec<ItemId>, ModelError> {
        self.view.sorted_ids(list)
    }

    #[must_use]
    pub fn phase(&self, list: &ListName) -> ListPhase {
        if self.pending.values().any(|op| op.touches(list)) {
            ListPhase::Mutating
        } else {
            ListPhase::Idle
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingOperation> {
        self.pending.values()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    // -- commands -----------------------------------------------------------

    /// Move `item` out of its list into `target`, appending it.
    ///
    /// Without a target the item goes to the other list, which is only
    /// defined when exactly two lists exist. Toggling into the list the item
    /// already occupies is a no-op.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownItem`], [`ModelError::UnknownList`],
    /// [`SyncError::AmbiguousTarget`] or [`SyncError::LaneBusy`]. The model is
    /// untouched on error.
    pub fn toggle_membership(
        &mut self,
        item: &ItemId,
        target: Option<&ListName>,
    ) -> Result<Command, SyncError> {
        let from = self
            .view
            .list_of(item)
            .cloned()
            .ok_or_else(|| ModelError::UnknownItem(item.clone()))?;
        let to = self.resolve_target(item, &from, target)?;
        if to == from {
            debug!(%item, list = %from, "toggle into current list ignored");
            return Ok(Command::default());
        }

        let (kind, route) = if self.config.is_tracked(&to) {
            (OperationKind::Add, Route::PersistOrder(to.clone()))
        } else if self.config.is_tracked(&from) {
            (OperationKind::Remove, Route::RemoveMembership(item.clone(), from.clone()))
        } else {
            (OperationKind::Add, Route::AddMembership(item.clone(), to.clone()))
        };
        self.admit(route.lane())?;

        let before = vec![self.view.snapshot(&from)?, self.view.snapshot(&to)?];
        let previous = self.view.clone();
        self.view.move_item(item, &from, &to, None)?;
        debug!(%item, %from, %to, ?kind, "optimistic toggle");

        let intent = Intent::Move {
            item: item.clone(),
            to,
        };
        Ok(self.issue(kind, vec![item.clone()], intent, route, before, &previous))
    }

    /// Replace the order of `list` with `new_order`.
    ///
    /// An order equal to the current one is a no-op.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`], [`ModelError::InvalidPermutation`] or
    /// [`SyncError::LaneBusy`]. The model is untouched on error.
    pub fn reorder_list(
        &mut self,
        list: &ListName,
        new_order: Vec<ItemId>,
    ) -> Result<Command, SyncError> {
        if self.view.ids(list)? == new_order.as_slice() {
            debug!(%list, "reorder without change ignored");
            return Ok(Command::default());
        }
        let route = Route::PersistOrder(list.clone());
        self.admit(route.lane())?;

        let before = vec![self.view.snapshot(list)?];
        let previous = self.view.clone();
        self.view.reorder(list, &new_order)?;
        debug!(%list, len = new_order.len(), "optimistic reorder");

        let intent = Intent::Reorder {
            list: list.clone(),
            order: new_order.clone(),
        };
        Ok(self.issue(OperationKind::Reorder, new_order, intent, route, before, &previous))
    }

    // -- responses ----------------------------------------------------------

    /// Fold the response for `op` into the controller.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownOperation`] when `op` is not in flight (never
    /// issued, still queued, or already settled). Nothing changes on error.
    pub fn settle(
        &mut self,
        op: OpId,
        result: Result<(), GatewayError>,
    ) -> Result<Settlement, SyncError> {
        if !self.pending.get(&op).is_some_and(PendingOperation::is_in_flight) {
            return Err(SyncError::UnknownOperation(op));
        }
        let Some(pending) = self.pending.remove(&op) else {
            return Err(SyncError::UnknownOperation(op));
        };

        let outcome = match result {
            Ok(()) if pending.superseded => {
                debug!(%op, "superseded request applied late, absorbing server state");
                self.commit(&pending);
                Outcome::Superseded
            }
            Ok(()) => {
                self.commit(&pending);
                Outcome::Committed
            }
            Err(err) if pending.superseded => {
                debug!(%op, error = %err, "failure for superseded request swallowed");
                Outcome::Superseded
            }
            Err(err) => {
                self.roll_back(&pending, &err);
                Outcome::RolledBack
            }
        };

        let dispatches = self.release(pending.route.lane()).into_iter().collect();
        Ok(Settlement {
            op,
            outcome,
            dispatches,
        })
    }

    // -- internals ----------------------------------------------------------

    fn resolve_target(
        &self,
        item: &ItemId,
        from: &ListName,
        target: Option<&ListName>,
    ) -> Result<ListName, SyncError> {
        if let Some(target) = target {
            if !self.view.contains_list(target) {
                return Err(ModelError::UnknownList(target.clone()).into());
            }
            return Ok(target.clone());
        }
        let lists: Vec<&ListName> = self.view.list_names().collect();
        match lists.as_slice() {
            [first, second] => Ok(if *first == from { (*second).clone() } else { (*first).clone() }),
            _ => Err(SyncError::AmbiguousTarget {
                item: item.clone(),
                lists: lists.len(),
            }),
        }
    }

    fn lane_busy(&self, lane: &ListName) -> bool {
        self.pending.values().any(|op| op.route.lane() == lane)
    }

    fn admit(&self, lane: &ListName) -> Result<(), SyncError> {
        if self.config.overlap == OverlapPolicy::Reject && self.lane_busy(lane) {
            debug!(%lane, "command rejected, lane busy");
            return Err(SyncError::LaneBusy(lane.clone()));
        }
        Ok(())
    }

    fn issue(
        &mut self,
        kind: OperationKind,
        items: Vec<ItemId>,
        intent: Intent,
        route: Route,
        before: Vec<ListSnapshot>,
        previous: &ListModel,
    ) -> Command {
        let id = OpId(self.next_op);
        self.next_op = self.next_op.saturating_add(1);

        let stage = if self.config.overlap == OverlapPolicy::Queue && self.lane_busy(route.lane()) {
            Stage::Queued
        } else {
            Stage::InFlight
        };
        for snap in &before {
            if self.phase(snap.list()) == ListPhase::Idle {
                trace!(list = %snap.list(), "phase idle -> mutating");
            }
        }
        self.pending.insert(
            id,
            PendingOperation {
                id,
                kind,
                items,
                intent,
                route,
                before,
                stage,
                sent: None,
                superseded: false,
            },
        );
        self.publish(previous);

        let dispatches = match stage {
            Stage::InFlight => self.dispatch(id).into_iter().collect(),
            Stage::Queued => {
                debug!(op = %id, "request queued behind lane");
                Vec::new()
            }
        };
        Command {
            op: Some(id),
            dispatches,
        }
    }

    /// Materialize the request for `id` and mark it in flight.
    fn dispatch(&mut self, id: OpId) -> Option<Dispatch> {
        let route = self.pending.get(&id)?.route.clone();
        let request = match route {
            Route::PersistOrder(list) => {
                let projection = self.project(Some(id));
                let ids = projection.sorted_ids(&list).unwrap_or_default();
                GatewayRequest::PersistOrder { list, ids }
            }
            Route::AddMembership(item, list) => GatewayRequest::AddMembership { item, list },
            Route::RemoveMembership(item, list) => GatewayRequest::RemoveMembership { item, list },
        };
        let op = self.pending.get_mut(&id)?;
        op.stage = Stage::InFlight;
        op.sent = Some(request.clone());
        Some(Dispatch { op: id, request })
    }

    /// Release the oldest queued request of `lane` if nothing is in flight.
    fn release(&mut self, lane: &ListName) -> Option<Dispatch> {
        let lane_ops = || self.pending.values().filter(|op| op.route.lane() == lane);
        if lane_ops().any(PendingOperation::is_in_flight) {
            return None;
        }
        let next = lane_ops().find(|op| op.stage == Stage::Queued)?.id;
        debug!(op = %next, %lane, "queued request released");
        self.dispatch(next)
    }

    /// `confirmed` with every live pending intent up to `upto` replayed.
    fn project(&self, upto: Option<OpId>) -> ListModel {
        let mut model = self.confirmed.clone();
        for op in self.pending.values() {
            if upto.is_some_and(|upto| op.id > upto) {
                break;
            }
            if !op.superseded {
                op.intent.apply(&mut model);
            }
        }
        model
    }

    fn commit(&mut self, op: &PendingOperation) {
        match (&op.route, &op.sent) {
            (Route::PersistOrder(list), Some(GatewayRequest::PersistOrder { ids, .. })) => {
                let view = &self.view;
                let fallback = self.confirmed.list_names().find(|name| *name != list).cloned();
                let result = match fallback {
                    Some(fallback) => self.confirmed.assign_exact(list, ids, |id| {
                        view.list_of(id)
                            .filter(|owner| *owner != list)
                            .cloned()
                            .unwrap_or_else(|| fallback.clone())
                    }),
                    None => self.confirmed.reorder_reconciled(list, ids).map(|_| ()),
                };
                if let Err(err) = result {
                    warn!(op = %op.id, error = %err, "acknowledged order could not be applied");
                }
            }
            _ => op.intent.apply(&mut self.confirmed),
        }
        debug!(op = %op.id, kind = ?op.kind, "request committed");

        for earlier in self.pending.values_mut() {
            if earlier.id < op.id && !earlier.superseded && op.route.covers(&earlier.route) {
                trace!(op = %earlier.id, by = %op.id, "request superseded");
                earlier.superseded = true;
            }
        }
        self.rebuild_view();
    }

    fn roll_back(&mut self, op: &PendingOperation, err: &GatewayError) {
        warn!(op = %op.id, kind = ?op.kind, error = %err, code = %err.code(), "request failed, rolling back");

        for snap in &op.before {
            trace!(list = %snap.list(), "phase mutating -> rolling_back");
        }
        self.rebuild_view();

        for snap in &op.before {
            trace!(list = %snap.list(), phase = ?self.phase(snap.list()), "rollback finished");
        }
        let message = self.config.failure_message.clone();
        self.notifier.on_operation_failed(&message);
    }

    /// Replace the view with the projection of `confirmed` and the live
    /// intents, notifying every list that changed.
    fn rebuild_view(&mut self) {
        let rebuilt = self.project(None);
        let previous = std::mem::replace(&mut self.view, rebuilt);
        self.publish(&previous);
    }

    /// Notify the view about every list that differs from `previous`.
    fn publish(&mut self, previous: &ListModel) {
        for list in self.view.list_names() {
            let now = self.view.ids(list).unwrap_or_default();
            let was = previous.ids(list).unwrap_or_default();
            if now == was {
                continue;
            }
            self.notifier.on_list_changed(list, now);
            if now.is_empty() != was.is_empty() {
                self.notifier.on_empty_state_changed(list, now.is_empty());
            }
        }
    }
}
