//! Cluster coordination against the placement control plane.
//!
//! [`coordinator::ClusterCoordinator`] owns the transport and endpoint
//! set; [`schedule`] computes config overrides and their rollback;
//! [`pause`] runs the scheduler pause sessions; [`stores`] queries the
//! node directory.

pub mod coordinator;
pub mod pause;
pub mod schedule;
pub mod stores;
