//! quiesce - cluster coordination for distributed backup and restore.
//!
//! Bulk-importing data into a live cluster fights the control plane's
//! rebalancing schedulers: regions get merged, leaders get moved, and
//! snapshots get throttled while the import is trying to push data in.
//! This crate suspends that interference for the duration of a bulk
//! operation and puts everything back afterwards:
//!
//! - [`ClusterCoordinator`] talks to the placement control plane over its
//!   REST endpoints, with first-success failover across addresses.
//! - [`ClusterCoordinator::remove_schedulers`] pauses the rebalancing
//!   schedulers and overrides the scheduling limits, keeping both alive
//!   with a renewing background task, and returns a one-shot
//!   [`UndoHandle`] that restores the prior state.
//! - [`backoff`] supplies the truncated-exponential retry policies the
//!   surrounding data-transfer code consumes.
//!
//! # Example
//!
//! ```no_run
//! use quiesce::config::ConnectOptions;
//! use quiesce::{ClusterCoordinator, NodeDirectory};
//! use std::sync::Arc;
//!
//! async fn run(directory: Arc<dyn NodeDirectory>) -> quiesce::Result<()> {
//!     let options = ConnectOptions::new("10.0.0.1:2379,10.0.0.2:2379");
//!     let coordinator = ClusterCoordinator::connect(&options, directory).await?;
//!
//!     let undo = coordinator.remove_schedulers().await.map_err(|f| f.error)?;
//!     // ... bulk import ...
//!     undo.undo(&coordinator).await?;
//!     coordinator.close();
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod error;

// Re-exports
pub use cluster::coordinator::{ClusterCoordinator, ClusterVersion, PAUSE_EXTENSION_VERSION};
pub use cluster::pause::PAUSE_TIMEOUT;
pub use cluster::schedule::{
    default_schedule_config, ClusterSnapshot, PauseConfigPolicy, PauseFailure, UndoHandle,
};
pub use cluster::stores::{
    filter_stores, live_stores, NodeDirectory, Store, StoreBehavior, StoreLabel,
};
pub use error::{QuiesceError, Result};
