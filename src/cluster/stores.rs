//! Store directory queries against the placement service.
//!
//! The directory client itself is supplied by the caller; this module only
//! defines the seam and the label-based filtering shared by the rest of
//! the tool. The pause path reads nothing but the number of live stores.

use crate::error::{QuiesceError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Label identifying columnar storage nodes, which cannot serve as
/// bulk-ingestion targets.
const COLUMNAR_ENGINE_KEY: &str = "engine";
const COLUMNAR_ENGINE_VALUE: &str = "tiflash";

/// A key/value label attached to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLabel {
    pub key: String,
    pub value: String,
}

/// A storage node known to the placement service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    /// Unique store identifier.
    pub id: u64,
    /// Address the store serves on.
    #[serde(default)]
    pub address: String,
    /// Labels attached to the store.
    #[serde(default)]
    pub labels: Vec<StoreLabel>,
}

impl Store {
    /// Whether the store runs the columnar engine.
    pub fn is_columnar(&self) -> bool {
        self.labels
            .iter()
            .any(|l| l.key == COLUMNAR_ENGINE_KEY && l.value == COLUMNAR_ENGINE_VALUE)
    }
}

/// Directory of live storage nodes, backed by the placement service's RPC
/// client. Failures propagate unchanged.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// List all live stores in the cluster.
    async fn list_stores(&self) -> Result<Vec<Store>>;
}

/// How to treat columnar stores when listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBehavior {
    /// Drop columnar stores from the result.
    SkipColumnar,
    /// Fail if any columnar store is live; restoring into a cluster with
    /// active columnar replicas would corrupt them.
    ErrorOnColumnar,
    /// Keep only columnar stores.
    ColumnarOnly,
}

/// Filter a store listing according to the requested behavior.
pub fn filter_stores(stores: Vec<Store>, behavior: StoreBehavior) -> Result<Vec<Store>> {
    let mut out = Vec::with_capacity(stores.len());
    for store in stores {
        let columnar = store.is_columnar();
        match behavior {
            StoreBehavior::SkipColumnar => {
                if !columnar {
                    out.push(store);
                }
            }
            StoreBehavior::ErrorOnColumnar => {
                if columnar {
                    return Err(QuiesceError::UnsupportedStore(format!(
                        "cannot restore to a cluster with active columnar ({}={}) stores, store id {}",
                        COLUMNAR_ENGINE_KEY, COLUMNAR_ENGINE_VALUE, store.id
                    )));
                }
                out.push(store);
            }
            StoreBehavior::ColumnarOnly => {
                if columnar {
                    out.push(store);
                }
            }
        }
    }
    Ok(out)
}

/// List live stores through the directory and filter them.
pub async fn live_stores(
    directory: &dyn NodeDirectory,
    behavior: StoreBehavior,
) -> Result<Vec<Store>> {
    filter_stores(directory.list_stores().await?, behavior)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(id: u64, labels: &[(&str, &str)]) -> Store {
        Store {
            id,
            address: format!("127.0.0.1:{}", 20160 + id),
            labels: labels
                .iter()
                .map(|(k, v)| StoreLabel {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    fn mixed_cluster() -> Vec<Store> {
        vec![
            store(1, &[]),
            store(2, &[("engine", "tiflash")]),
            store(3, &[]),
            store(4, &[("engine", "tikv")]),
            store(5, &[("else", "tikv"), ("engine", "tiflash")]),
            store(6, &[("else", "tiflash"), ("engine", "tikv")]),
        ]
    }

    fn ids(stores: &[Store]) -> Vec<u64> {
        stores.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_skip_columnar() {
        let stores = filter_stores(mixed_cluster(), StoreBehavior::SkipColumnar).unwrap();
        assert_eq!(ids(&stores), vec![1, 3, 4, 6]);
    }

    #[test]
    fn test_columnar_only() {
        let stores = filter_stores(mixed_cluster(), StoreBehavior::ColumnarOnly).unwrap();
        assert_eq!(ids(&stores), vec![2, 5]);
    }

    #[test]
    fn test_error_on_columnar() {
        let err = filter_stores(mixed_cluster(), StoreBehavior::ErrorOnColumnar).unwrap_err();
        assert!(matches!(err, QuiesceError::UnsupportedStore(_)));

        let stores =
            filter_stores(vec![store(1, &[])], StoreBehavior::ErrorOnColumnar).unwrap();
        assert_eq!(ids(&stores), vec![1]);
    }

    #[test]
    fn test_label_on_other_key_is_not_columnar() {
        assert!(!store(6, &[("else", "tiflash"), ("engine", "tikv")]).is_columnar());
        assert!(store(5, &[("else", "tikv"), ("engine", "tiflash")]).is_columnar());
    }
}
