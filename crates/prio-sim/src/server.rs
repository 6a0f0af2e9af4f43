use anyhow::{Context, Result};
use prio_core::{GatewayRequest, ListModel, ListName};

/// Backend with exact semantics: `persist_order` sets the list's content to
/// the payload, membership calls move the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedServer {
    state: ListModel,
    fallback: ListName,
    applied: usize,
}

impl SimulatedServer {
    /// `fallback` receives items dropped from a list by `persist_order` or
    /// `remove_membership`. Items dropped from `fallback` itself go to the
    /// first other list.
    #[must_use]
    pub const fn new(state: ListModel, fallback: ListName) -> Self {
        Self {
            state,
            fallback,
            applied: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &ListModel {
        &self.state
    }

    /// Number of requests applied, duplicates included.
    #[must_use]
    pub const fn applied(&self) -> usize {
        self.applied
    }

    /// Apply one request. Repeating a request is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error when the request names a list the server does not
    /// have.
    pub fn apply(&mut self, request: &GatewayRequest) -> Result<()> {
        self.applied += 1;
        match request {
            GatewayRequest::PersistOrder { list, ids } => {
                let evict_to = if list == &self.fallback {
                    self.state.list_names().find(|name| *name != list).cloned()
                } else {
                    Some(self.fallback.clone())
                };
                match evict_to {
                    Some(evict_to) => self
                        .state
                        .assign_exact(list, ids, |_| evict_to.clone())
                        .with_context(|| format!("persist_order on {list}"))?,
                    None => {
                        self.state
                            .reorder_reconciled(list, ids)
                            .with_context(|| format!("persist_order on {list}"))?;
                    }
                }
            }
            GatewayRequest::AddMembership { item, list } => {
                if let Some(from) = self.state.list_of(item).cloned()
                    && &from != list
                {
                    self.state
                        .move_item(item, &from, list, None)
                        .with_context(|| format!("add_membership {item} to {list}"))?;
                }
            }
            GatewayRequest::RemoveMembership { item, list } => {
                if self.state.list_of(item) == Some(list) && list != &self.fallback {
                    self.state
                        .move_item(item, list, &self.fallback, None)
                        .with_context(|| format!("remove_membership {item} from {list}"))?;
                }
            }
        }
        Ok(())
    }
}
