//! Scheduling-config overrides and rollback.
//!
//! Before bulk ingestion the coordinator replaces a fixed set of
//! scheduling-config values with safe ones, so the control plane does not
//! fight the import with merges, snapshots, and replica moves. This module
//! computes that override, captures the snapshot needed to roll it back,
//! and implements the restore path behind [`UndoHandle`].

use crate::cluster::coordinator::ClusterCoordinator;
use crate::error::{QuiesceError, Result};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Rebalancing schedulers that are safe and relevant to pause. Other
/// schedulers (e.g. evict-leader) must keep running.
pub(crate) const SCHEDULER_ALLOW_LIST: [&str; 6] = [
    "balance-leader-scheduler",
    "balance-hot-region-scheduler",
    "balance-region-scheduler",
    "shuffle-leader-scheduler",
    "shuffle-region-scheduler",
    "shuffle-hot-region-scheduler",
];

/// How to override one scheduling-config key while paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseConfigPolicy {
    /// Set the value to 0.
    SetZero,
    /// Multiply the current value by the live store count, capped at
    /// [`SCHEDULE_LIMIT_CAP`]; larger values can destabilize the cluster.
    MultiplyByLiveStoreCount,
    /// Set the value to the string `"false"`. The control plane's config
    /// deserializer rejects a boolean for these keys.
    SetFalseString,
}

/// Cap for limits scaled by store count.
const SCHEDULE_LIMIT_CAP: f64 = 40.0;

/// Keys overridden while scheduling is suspended, with their policies.
pub(crate) const PAUSE_CONFIG_POLICIES: [(&str, PauseConfigPolicy); 6] = [
    ("max-merge-region-keys", PauseConfigPolicy::SetZero),
    ("max-merge-region-size", PauseConfigPolicy::SetZero),
    (
        "leader-schedule-limit",
        PauseConfigPolicy::MultiplyByLiveStoreCount,
    ),
    (
        "region-schedule-limit",
        PauseConfigPolicy::MultiplyByLiveStoreCount,
    ),
    (
        "max-snapshot-count",
        PauseConfigPolicy::MultiplyByLiveStoreCount,
    ),
    (
        "enable-location-replacement",
        PauseConfigPolicy::SetFalseString,
    ),
];

/// Compute the override for every policy-table key present in the fetched
/// schedule config. Keys absent from the fetched config are skipped, never
/// invented.
pub(crate) fn compute_override(
    schedule_cfg: &Map<String, Value>,
    store_count: usize,
) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, policy) in PAUSE_CONFIG_POLICIES {
        let Some(current) = schedule_cfg.get(key) else {
            continue;
        };
        let value = match policy {
            PauseConfigPolicy::SetZero => Value::from(0),
            PauseConfigPolicy::SetFalseString => Value::from("false"),
            PauseConfigPolicy::MultiplyByLiveStoreCount => {
                let limit = current.as_f64().unwrap_or(0.0);
                Value::from((limit * store_count as f64).min(SCHEDULE_LIMIT_CAP))
            }
        };
        out.insert(key.to_string(), value);
    }
    out
}

/// Factory defaults of the overridden keys, taken from the control plane's
/// stock configuration. Used to reset a cluster whose saved config was lost.
pub fn default_schedule_config() -> Map<String, Value> {
    let mut cfg = Map::new();
    cfg.insert("max-merge-region-keys".into(), Value::from(200_000));
    cfg.insert("max-merge-region-size".into(), Value::from(20));
    cfg.insert("leader-schedule-limit".into(), Value::from(4));
    cfg.insert("region-schedule-limit".into(), Value::from(2048));
    cfg.insert("max-snapshot-count".into(), Value::from(3));
    cfg.insert("enable-location-replacement".into(), Value::from("true"));
    cfg
}

/// Cluster state captured before any mutation: the schedulers that were
/// paused and the schedule config as fetched. Owned exclusively by the
/// [`UndoHandle`] that closes over it.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// Schedulers paused by this session, in pause order.
    pub schedulers: Vec<String>,
    /// Schedule config as it was at capture time.
    pub schedule_cfg: Map<String, Value>,
}

/// One-shot handle reversing a scheduler suspension.
#[derive(Debug)]
pub struct UndoHandle {
    snapshot: Option<ClusterSnapshot>,
}

impl UndoHandle {
    /// A handle that undoes nothing, for the case nothing was changed.
    pub fn nop() -> Self {
        Self { snapshot: None }
    }

    pub(crate) fn from_snapshot(snapshot: ClusterSnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
        }
    }

    /// The captured snapshot, if any.
    pub fn snapshot(&self) -> Option<&ClusterSnapshot> {
        self.snapshot.as_ref()
    }

    /// Resume the paused schedulers and restore the saved schedule config.
    ///
    /// A restore failure surfaces as [`QuiesceError::ConfigRestore`]: the
    /// cluster may still be running with the transient safety limits, which
    /// the operator must know about.
    pub async fn undo(self, coordinator: &ClusterCoordinator) -> Result<()> {
        let Some(snapshot) = self.snapshot else {
            return Ok(());
        };
        restore_snapshot(coordinator, snapshot).await
    }
}

/// Restore scheduler presence and config values from a snapshot.
pub(crate) async fn restore_snapshot(
    coordinator: &ClusterCoordinator,
    snapshot: ClusterSnapshot,
) -> Result<()> {
    coordinator.resume_schedulers(&snapshot.schedulers).await?;

    info!(config = ?snapshot.schedule_cfg, "restoring schedule config");
    let mut merged = Map::new();
    for (key, _) in PAUSE_CONFIG_POLICIES {
        // Only keys that existed at capture time are restored.
        if let Some(value) = snapshot.schedule_cfg.get(key) {
            merged.insert(key.to_string(), value.clone());
        }
    }

    if coordinator.pause_extension_supported() {
        // A zero-TTL update invalidates any still-active temporary
        // override before the saved values go back in.
        coordinator
            .update_schedule_config(&merged, Some(Duration::ZERO))
            .await
            .map_err(|e| {
                QuiesceError::ConfigRestore(format!(
                    "failed to invalidate temporary override: {e}"
                ))
            })?;
    }
    coordinator
        .update_schedule_config(&merged, None)
        .await
        .map_err(|e| {
            QuiesceError::ConfigRestore(format!("failed to reapply saved schedule config: {e}"))
        })?;
    Ok(())
}

/// Failure while suspending cluster scheduling. Carries the undo handle
/// with the best-known snapshot so the caller can still attempt cleanup.
#[derive(Debug, Error)]
#[error("failed to suspend cluster scheduling: {error}")]
pub struct PauseFailure {
    /// Undo handle reflecting whatever was captured before the failure.
    pub undo: UndoHandle,
    /// The underlying error.
    #[source]
    pub error: QuiesceError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_multiply_by_store_count() {
        let schedule_cfg = cfg(&[("leader-schedule-limit", json!(4))]);
        let out = compute_override(&schedule_cfg, 3);
        assert_eq!(out["leader-schedule-limit"].as_f64(), Some(12.0));
    }

    #[test]
    fn test_multiply_is_capped_at_forty() {
        let schedule_cfg = cfg(&[("leader-schedule-limit", json!(4))]);
        let out = compute_override(&schedule_cfg, 20);
        assert_eq!(out["leader-schedule-limit"].as_f64(), Some(40.0));
    }

    #[test]
    fn test_set_zero_and_false_string() {
        let schedule_cfg = cfg(&[
            ("max-merge-region-keys", json!(200_000)),
            ("max-merge-region-size", json!(20)),
            ("enable-location-replacement", json!(true)),
        ]);
        let out = compute_override(&schedule_cfg, 5);
        assert_eq!(out["max-merge-region-keys"], json!(0));
        assert_eq!(out["max-merge-region-size"], json!(0));
        // Must be the string "false"; the control plane rejects a boolean.
        assert_eq!(out["enable-location-replacement"], json!("false"));
        assert!(out["enable-location-replacement"].is_string());
    }

    #[test]
    fn test_absent_keys_are_never_invented() {
        let schedule_cfg = cfg(&[
            ("leader-schedule-limit", json!(4)),
            ("some-unrelated-knob", json!(7)),
        ]);
        let out = compute_override(&schedule_cfg, 2);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("leader-schedule-limit"));
    }

    #[test]
    fn test_default_schedule_config_covers_all_policy_keys() {
        let defaults = default_schedule_config();
        for (key, _) in PAUSE_CONFIG_POLICIES {
            assert!(defaults.contains_key(key), "missing default for {key}");
        }
        assert_eq!(defaults["max-merge-region-keys"], json!(200_000));
    }

    #[test]
    fn test_nop_undo_has_no_snapshot() {
        assert!(UndoHandle::nop().snapshot().is_none());
    }
}
