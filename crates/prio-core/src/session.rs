//! Async driver for [`SyncController`].
//!
//! A [`SyncSession`] runs commands against the controller, spawns one local
//! task per gateway request, and settles each request when its future
//! resolves. Everything stays on one thread: the controller sits in an
//! `Rc<RefCell<_>>` and is only borrowed for the synchronous steps, never
//! across an await.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use futures::task::{LocalSpawn, LocalSpawnExt};
use tracing::{debug, warn};

use crate::controller::{Command, Dispatch, OpId, SyncController};
use crate::error::{GatewayError, ModelError, SyncError};
use crate::gateway::PersistenceGateway;
use crate::model::{ItemId, ListName};
use crate::view::ViewNotifier;

pub struct SyncSession<N, G, S> {
    controller: Rc<RefCell<SyncController<N>>>,
    gateway: Rc<G>,
    spawner: S,
}

impl<N, G, S> SyncSession<N, G, S>
where
    N: ViewNotifier + 'static,
    G: PersistenceGateway + 'static,
    S: LocalSpawn + Clone + 'static,
{
    #[must_use]
    pub fn new(controller: SyncController<N>, gateway: G, spawner: S) -> Self {
        Self {
            controller: Rc::new(RefCell::new(controller)),
            gateway: Rc::new(gateway),
            spawner,
        }
    }

    /// Borrow the controller for inspection.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a [`ViewNotifier`] callback.
    #[must_use]
    pub fn controller(&self) -> Ref<'_, SyncController<N>> {
        self.controller.borrow()
    }

    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Ids of `list` in the optimistic view.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownList`] when `list` was never declared.
    pub fn sorted_ids(&self, list: &ListName) -> Result<Vec<ItemId>, ModelError> {
        self.controller.borrow().sorted_ids(list)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.controller.borrow().is_idle()
    }

    /// See [`SyncController::toggle_membership`].
    ///
    /// # Errors
    ///
    /// Propagates the controller's refusal.
    ///
    /// # Panics
    ///
    /// Panics on programming errors when `strict_assertions` is set.
    pub fn toggle_membership(
        &self,
        item: &ItemId,
        target: Option<&ListName>,
    ) -> Result<Option<OpId>, SyncError> {
        let result = self.controller.borrow_mut().toggle_membership(item, target);
        self.run(result)
    }

    /// See [`SyncController::reorder_list`].
    ///
    /// # Errors
    ///
    /// Propagates the controller's refusal.
    ///
    /// # Panics
    ///
    /// Panics on programming errors when `strict_assertions` is set.
    pub fn reorder_list(
        &self,
        list: &ListName,
        new_order: Vec<ItemId>,
    ) -> Result<Option<OpId>, SyncError> {
        let result = self.controller.borrow_mut().reorder_list(list, new_order);
        self.run(result)
    }

    fn run(&self, result: Result<Command, SyncError>) -> Result<Option<OpId>, SyncError> {
        match result {
            Ok(command) => {
                for dispatch in command.dispatches {
                    spawn_dispatch(&self.controller, &self.gateway, &self.spawner, dispatch);
                }
                Ok(command.op)
            }
            Err(err) => {
                let strict = self.controller.borrow().config().strict_assertions;
                assert!(
                    !(strict && err.is_programming_error()),
                    "{}: {err}",
                    err.code()
                );
                warn!(code = %err.code(), error = %err, "command refused");
                Err(err)
            }
        }
    }
}

fn spawn_dispatch<N, G, S>(
    controller: &Rc<RefCell<SyncController<N>>>,
    gateway: &Rc<G>,
    spawner: &S,
    dispatch: Dispatch,
) where
    N: ViewNotifier + 'static,
    G: PersistenceGateway + 'static,
    S: LocalSpawn + Clone + 'static,
{
    let Dispatch { op, request } = dispatch;
    debug!(%op, lane = %request.lane(), "sending request");
    let response = request.send(gateway.as_ref());

    let task_controller = Rc::clone(controller);
    let task_gateway = Rc::clone(gateway);
    let task_spawner = spawner.clone();
    let task = async move {
        let result = response.await;
        settle(&task_controller, &task_gateway, &task_spawner, op, result);
    };

    if let Err(err) = spawner.spawn_local(task) {
        warn!(%op, error = %err, "could not spawn request task");
        settle(controller, gateway, spawner, op, Err(GatewayError::Network(err.to_string())));
    }
}

fn settle<N, G, S>(
    controller: &Rc<RefCell<SyncController<N>>>,
    gateway: &Rc<G>,
    spawner: &S,
    op: OpId,
    result: Result<(), GatewayError>,
) where
    N: ViewNotifier + 'static,
    G: PersistenceGateway + 'static,
    S: LocalSpawn + Clone + 'static,
{
    let settled = controller.borrow_mut().settle(op, result);
    match settled {
        Ok(settlement) => {
            debug!(%op, outcome = ?settlement.outcome, "request settled");
            for next in settlement.dispatches {
                spawn_dispatch(controller, gateway, spawner, next);
            }
        }
        Err(err) => warn!(%op, error = %err, "settlement ignored"),
    }
}
