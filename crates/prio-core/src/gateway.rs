//! Persistence gateway contract.
//!
//! A gateway is the controller's only view of the backend. The trait is
//! deliberately small: three calls, each resolving to success or a
//! [`GatewayError`]. Futures are `'static` so a driver can spawn them on a
//! single-threaded executor without borrowing the gateway.

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::model::{ItemId, ListName};

/// Future returned by every gateway call.
pub type GatewayFuture = LocalBoxFuture<'static, Result<(), GatewayError>>;

/// Backend contract for list persistence.
pub trait PersistenceGateway {
    /// Persist the complete order of `list`. The server treats the payload
    /// as ground truth for the list's content.
    fn persist_order(&self, list: &ListName, ordered_ids: &[ItemId]) -> GatewayFuture;

    /// Record that `item` now belongs to `target`.
    fn add_membership(&self, item: &ItemId, target: &ListName) -> GatewayFuture;

    /// Record that `item` no longer belongs to `source`.
    fn remove_membership(&self, item: &ItemId, source: &ListName) -> GatewayFuture;
}

/// Value-level description of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayRequest {
    PersistOrder { list: ListName, ids: Vec<ItemId> },
    AddMembership { item: ItemId, list: ListName },
    RemoveMembership { item: ItemId, list: ListName },
}

impl GatewayRequest {
    /// The list this request persists to. Requests sharing a lane are never
    /// in flight together under the queue policy.
    #[must_use]
    pub const fn lane(&self) -> &ListName {
        match self {
            Self::PersistOrder { list, .. }
            | Self::AddMembership { list, .. }
            | Self::RemoveMembership { list, .. } => list,
        }
    }

    /// Issue this request through `gateway`.
    pub fn send<G>(&self, gateway: &G) -> GatewayFuture
    where
        G: PersistenceGateway + ?Sized,
    {
        match self {
            Self::PersistOrder { list, ids } => gateway.persist_order(list, ids),
            Self::AddMembership { item, list } => gateway.add_membership(item, list),
            Self::RemoveMembership { item, list } => gateway.remove_membership(item, list),
        }
    }
}
