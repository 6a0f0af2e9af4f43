//! prio-core library.
//!
//! Ordered membership of items across named lists, kept in sync with a
//! backend optimistically: the model changes first, the request follows, and
//! a failed request is compensated.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums per layer ([`error`]); `anyhow::Result`
//!   only for config loading.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod model;
pub mod rest;
pub mod session;
pub mod view;

pub use config::{ConfigFile, OverlapPolicy, SyncConfig, load_config};
pub use controller::{
    Command, Dispatch, ListPhase, OpId, OperationKind, Outcome, PendingOperation, Settlement,
    SyncController,
};
pub use error::{ErrorCode, GatewayError, ModelError, SyncError};
pub use gateway::{GatewayFuture, GatewayRequest, PersistenceGateway};
pub use model::{ItemId, ListModel, ListName, ListSeed, ListSnapshot};
pub use session::SyncSession;
pub use view::{RecordingNotifier, ViewEvent, ViewNotifier};
