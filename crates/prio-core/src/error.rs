use std::fmt;

use crate::controller::OpId;
use crate::model::{ItemId, ListName};

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    ItemNotFound,
    InvalidPermutation,
    UnknownList,
    DuplicateItem,
    AmbiguousTarget,
    LaneBusy,
    UnknownOperation,
    NetworkFailure,
    ServerRejected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::ItemNotFound => "E2001",
            Self::InvalidPermutation => "E2002",
            Self::UnknownList => "E2003",
            Self::DuplicateItem => "E2004",
            Self::AmbiguousTarget => "E2005",
            Self::LaneBusy => "E4001",
            Self::UnknownOperation => "E4002",
            Self::NetworkFailure => "E5001",
            Self::ServerRejected => "E5002",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::ItemNotFound => "Item not found in list",
            Self::InvalidPermutation => "New order is not a permutation of the list",
            Self::UnknownList => "Unknown list",
            Self::DuplicateItem => "Item appears in more than one list",
            Self::AmbiguousTarget => "Toggle target list is ambiguous",
            Self::LaneBusy => "A request for this list is already in flight",
            Self::UnknownOperation => "Unknown or already settled operation",
            Self::NetworkFailure => "Network failure",
            Self::ServerRejected => "Server rejected the request",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the sync config file and retry."),
            Self::ItemNotFound | Self::InvalidPermutation | Self::DuplicateItem => {
                Some("The view and the list model disagree; rebuild the model from server state.")
            }
            Self::UnknownList => Some("Declare every list in the initial seed."),
            Self::AmbiguousTarget => Some("Pass an explicit target list when more than two lists exist."),
            Self::LaneBusy => Some("Wait for the pending request to settle, or use the queue policy."),
            Self::UnknownOperation => None,
            Self::NetworkFailure | Self::ServerRejected => Some("Redo the action to try again."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

/// Programming/data errors raised by [`crate::model::ListModel`].
///
/// None of these should occur while the view only offers actions the model
/// permits; they are not user-recoverable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// The item is not a member of the list it was expected in.
    #[error("item {item} not found in list {list}")]
    ItemNotFound { item: ItemId, list: ListName },

    /// A reorder did not list exactly the current members.
    #[error("new order for list {list} is not a permutation of its {expected} members")]
    InvalidPermutation { list: ListName, expected: usize },

    /// The item is not a member of any list.
    #[error("item {0} is not in any list")]
    UnknownItem(ItemId),

    /// The list name was never declared.
    #[error("unknown list {0}")]
    UnknownList(ListName),

    /// The same item was seeded into two lists (or twice into one).
    #[error("item {0} appears more than once")]
    DuplicateItem(ItemId),
}

impl ModelError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ItemNotFound { .. } | Self::UnknownItem(_) => ErrorCode::ItemNotFound,
            Self::InvalidPermutation { .. } => ErrorCode::InvalidPermutation,
            Self::UnknownList(_) => ErrorCode::UnknownList,
            Self::DuplicateItem(_) => ErrorCode::DuplicateItem,
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway errors
// ---------------------------------------------------------------------------

/// Expected, recoverable persistence failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
}

impl GatewayError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Network(_) => ErrorCode::NetworkFailure,
            Self::Server { .. } => ErrorCode::ServerRejected,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller errors
// ---------------------------------------------------------------------------

/// Errors returned by [`crate::controller::SyncController`] commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Model(#[from] ModelError),

    /// `toggle_membership` without a target while more than two lists exist.
    #[error("toggle target for item {item} is ambiguous across {lists} lists")]
    AmbiguousTarget { item: ItemId, lists: usize },

    /// The reject policy refused a command because its lane is busy.
    #[error("list {0} already has a request in flight")]
    LaneBusy(ListName),

    /// `settle` was called for an operation the controller does not know.
    #[error("operation {0} is unknown, queued, or already settled")]
    UnknownOperation(OpId),
}

impl SyncError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Model(err) => err.code(),
            Self::AmbiguousTarget { .. } => ErrorCode::AmbiguousTarget,
            Self::LaneBusy(_) => ErrorCode::LaneBusy,
            Self::UnknownOperation(_) => ErrorCode::UnknownOperation,
        }
    }

    /// Whether this is a programming/data error rather than a policy refusal.
    #[must_use]
    pub const fn is_programming_error(&self) -> bool {
        matches!(self, Self::Model(_) | Self::AmbiguousTarget { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::ItemNotFound,
            ErrorCode::InvalidPermutation,
            ErrorCode::UnknownList,
            ErrorCode::DuplicateItem,
            ErrorCode::AmbiguousTarget,
            ErrorCode::LaneBusy,
            ErrorCode::UnknownOperation,
            ErrorCode::NetworkFailure,
            ErrorCode::ServerRejected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::InvalidPermutation.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn sync_error_forwards_model_code() {
        let err = SyncError::from(ModelError::UnknownList(ListName::from("nope")));
        assert_eq!(err.code(), ErrorCode::UnknownList);
        assert!(err.is_programming_error());
        assert!(!SyncError::LaneBusy(ListName::from("p")).is_programming_error());
    }

    #[test]
    fn gateway_error_display_includes_status() {
        let err = GatewayError::Server {
            status: 422,
            body: "stale".into(),
        };
        assert_eq!(err.to_string(), "server error 422: stale");
        assert_eq!(err.code(), ErrorCode::ServerRejected);
    }
}
