//! View-layer contract.
//!
//! The controller calls a [`ViewNotifier`] synchronously after every model
//! mutation, optimistic or compensating. Implementations only read what they
//! are handed; they never reach back into the controller.

use serde::Serialize;

use crate::model::{ItemId, ListName};

/// Receiver for state-change events (implemented by the UI layer).
pub trait ViewNotifier {
    /// A list's order or membership changed.
    fn on_list_changed(&mut self, list: &ListName, ids: &[ItemId]);

    /// A list became empty (`true`) or stopped being empty (`false`).
    fn on_empty_state_changed(&mut self, list: &ListName, is_empty: bool);

    /// A persistence request failed and its effect was rolled back.
    fn on_operation_failed(&mut self, message: &str);
}

/// One notification, as recorded by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewEvent {
    ListChanged { list: ListName, ids: Vec<ItemId> },
    EmptyStateChanged { list: ListName, is_empty: bool },
    OperationFailed { message: String },
}

/// Notifier that keeps every event in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingNotifier {
    events: Vec<ViewEvent>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[ViewEvent] {
        &self.events
    }

    /// Drain and return everything recorded so far.
    pub fn take(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.events)
    }

    /// Every order published for `list`, oldest first.
    #[must_use]
    pub fn list_history(&self, list: &ListName) -> Vec<Vec<ItemId>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ViewEvent::ListChanged { list: changed, ids } if changed == list => {
                    Some(ids.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, ViewEvent::OperationFailed { .. }))
            .count()
    }
}

impl ViewNotifier for RecordingNotifier {
    fn on_list_changed(&mut self, list: &ListName, ids: &[ItemId]) {
        self.events.push(ViewEvent::ListChanged {
            list: list.clone(),
            ids: ids.to_vec(),
        });
    }

    fn on_empty_state_changed(&mut self, list: &ListName, is_empty: bool) {
        self.events.push(ViewEvent::EmptyStateChanged {
            list: list.clone(),
            is_empty,
        });
    }

    fn on_operation_failed(&mut self, message: &str) {
        self.events.push(ViewEvent::OperationFailed {
            message: message.to_string(),
        });
    }
}
