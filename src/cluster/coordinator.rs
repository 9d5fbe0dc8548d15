//! Coordinator for the cluster's placement control plane.
//!
//! Owns the HTTP transport, the ordered set of control-plane endpoint
//! addresses (with first-success failover on every call), and the cluster
//! version detected once at construction. The version gates whether
//! config overrides may carry a TTL (supported from 4.0.8 on).

use crate::cluster::schedule::{
    compute_override, default_schedule_config, ClusterSnapshot, PauseFailure, UndoHandle,
    SCHEDULER_ALLOW_LIST,
};
use crate::cluster::stores::NodeDirectory;
use crate::codec;
use crate::config::ConnectOptions;
use crate::error::{QuiesceError, Result};
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Certificate, Client, Identity, Method};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub(crate) const CLUSTER_VERSION_PREFIX: &str = "pd/api/v1/config/cluster-version";
pub(crate) const REGION_STATS_PREFIX: &str = "pd/api/v1/stats/region";
pub(crate) const SCHEDULER_PREFIX: &str = "pd/api/v1/schedulers";
pub(crate) const SCHEDULE_CONFIG_PREFIX: &str = "pd/api/v1/config/schedule";

/// Escape set matching query-string escaping of raw key bytes.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A three-component cluster version, compared against
/// [`PAUSE_EXTENSION_VERSION`] only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClusterVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// First version where config overrides accept a TTL, making the
/// suspension self-expiring if never renewed.
pub const PAUSE_EXTENSION_VERSION: ClusterVersion = ClusterVersion::new(4, 0, 8);

impl ClusterVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string as reported by the control plane, e.g.
    /// `"\"v4.0.8\"\n"`.
    ///
    /// A pre-release suffix on the patch component is dropped, so
    /// `v4.0.8-rc.2` parses to `4.0.8` and compares equal to the release.
    /// Strict semver would order the pre-release below it; only the fixed
    /// [`PAUSE_EXTENSION_VERSION`] comparison rides on this.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw
            .trim()
            .trim_matches('"')
            .trim_start_matches('v');
        let mut parts = trimmed.splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        // The patch component may carry a pre-release suffix such as "8-rc".
        let patch_part = parts.next()?;
        let digits: String = patch_part.chars().take_while(|c| c.is_ascii_digit()).collect();
        let patch = digits.parse().ok()?;
        Some(Self::new(major, minor, patch))
    }

    /// Parse a version, falling back to `0.0.0` for anything unparseable.
    /// Construction never fails on a weird version string; an old version
    /// just disables the TTL path.
    pub fn parse_lossy(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        Self::parse(&text).unwrap_or_else(|| {
            warn!(version = %text.trim(), "unparseable cluster version, falling back to 0.0.0");
            Self::new(0, 0, 0)
        })
    }
}

/// Send one HTTP request to one control-plane address. A non-2xx response
/// surfaces as [`QuiesceError::ControlPlane`] with the status and body.
pub(crate) async fn control_plane_request(
    http: &Client,
    addr: &str,
    path: &str,
    method: Method,
    body: Option<&Value>,
) -> Result<Vec<u8>> {
    let url = format!("{}/{}", addr.trim_end_matches('/'), path);
    let mut request = http.request(method, &url);
    if let Some(body) = body {
        request = request.json(body);
    }
    let response = request.send().await?;
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        return Err(QuiesceError::ControlPlane {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
            url,
        });
    }
    Ok(bytes.to_vec())
}

/// Try every address in order, returning the first success or the last
/// error seen.
pub(crate) async fn try_each_addr(
    http: &Client,
    addrs: &[String],
    path: &str,
    method: Method,
    body: Option<&Value>,
) -> Result<Vec<u8>> {
    let mut last_err = QuiesceError::ClusterUnreachable(
        "no control-plane address configured".to_string(),
    );
    for addr in addrs {
        match control_plane_request(http, addr, path, method.clone(), body).await {
            Ok(bytes) => return Ok(bytes),
            Err(err) => {
                debug!(%addr, error = %err, "control-plane request failed, trying next address");
                last_err = err;
            }
        }
    }
    Err(last_err)
}

/// Post a schedule-config update, trying each address in order; success on
/// any one address is sufficient.
pub(crate) async fn post_schedule_config(
    http: &Client,
    addrs: &[String],
    cfg: &Map<String, Value>,
    ttl: Option<Duration>,
) -> Result<()> {
    let path = match ttl {
        Some(ttl) => format!("{SCHEDULE_CONFIG_PREFIX}?ttlSecond={}", ttl.as_secs()),
        None => SCHEDULE_CONFIG_PREFIX.to_string(),
    };
    let body = Value::Object(cfg.clone());
    let mut last_err = QuiesceError::ClusterUnreachable(
        "no control-plane address configured".to_string(),
    );
    for addr in addrs {
        match control_plane_request(http, addr, &path, Method::POST, Some(&body)).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                warn!(%addr, error = %err, "failed to update schedule config, trying next address");
                last_err = err;
            }
        }
    }
    Err(last_err)
}

fn percent_encode_key(raw: &[u8]) -> String {
    percent_encode(raw, QUERY_ESCAPE).to_string()
}

#[derive(Deserialize)]
struct RegionStats {
    count: u64,
}

/// Coordinator for control-plane interactions.
///
/// The address list and transport are read-only after construction and
/// shared freely; the pause/renewal state is owned by the single active
/// pause session (one session at a time is a caller precondition).
pub struct ClusterCoordinator {
    pub(crate) addrs: Vec<String>,
    pub(crate) http: Client,
    directory: Arc<dyn NodeDirectory>,
    version: ClusterVersion,
    /// Stop sender of the current pause session's renewal task, replaced
    /// when a new session spawns its task. The channel has capacity 1 so
    /// sending never blocks, even if the task already exited.
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    shutdown_tx: watch::Sender<bool>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

impl fmt::Debug for ClusterCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCoordinator")
            .field("addrs", &self.addrs)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl ClusterCoordinator {
    /// Connect to the control plane.
    ///
    /// Normalizes the comma-separated address list (schemeless addresses
    /// get `https` when TLS material is present, `http` otherwise), then
    /// probes each address in order for the cluster version string. Fails
    /// with [`QuiesceError::ClusterUnreachable`] only if no address
    /// responds; an unparseable version string is not an error.
    pub async fn connect(
        options: &ConnectOptions,
        directory: Arc<dyn NodeDirectory>,
    ) -> Result<Self> {
        options.validate()?;
        let http = build_http_client(options)?;
        let scheme = if options.tls.is_some() { "https" } else { "http" };

        let addrs: Vec<String> = options
            .endpoints
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|a| {
                if a.starts_with("http") {
                    a.to_string()
                } else {
                    format!("{scheme}://{a}")
                }
            })
            .collect();

        let mut version_bytes = None;
        let mut last_err = None;
        for addr in &addrs {
            match control_plane_request(&http, addr, CLUSTER_VERSION_PREFIX, Method::GET, None)
                .await
            {
                Ok(bytes) => {
                    version_bytes = Some(bytes);
                    break;
                }
                Err(err) => {
                    debug!(%addr, error = %err, "version probe failed");
                    last_err = Some(err);
                }
            }
        }
        let Some(version_bytes) = version_bytes else {
            return Err(QuiesceError::ClusterUnreachable(format!(
                "control-plane addresses ({}) not available: {}",
                options.endpoints,
                last_err.map(|e| e.to_string()).unwrap_or_default()
            )));
        };

        let version = ClusterVersion::parse_lossy(&version_bytes);
        info!(?version, endpoints = ?addrs, "connected to control plane");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            addrs,
            http,
            directory,
            version,
            stop_tx: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The current session's stop-sender slot. The lock is held only for
    /// plain reads and writes, never across an await.
    pub(crate) fn stop_sender_slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<()>>> {
        self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The detected cluster version.
    pub fn version(&self) -> ClusterVersion {
        self.version
    }

    /// The normalized control-plane addresses, in failover order.
    pub fn endpoints(&self) -> &[String] {
        &self.addrs
    }

    /// The node-directory client supplied at construction.
    pub fn directory(&self) -> &Arc<dyn NodeDirectory> {
        &self.directory
    }

    /// Whether config overrides may carry a TTL (cluster version 4.0.8+).
    pub fn pause_extension_supported(&self) -> bool {
        self.version >= PAUSE_EXTENSION_VERSION
    }

    /// Issue a request against the control plane with address failover.
    pub async fn request(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Vec<u8>> {
        try_each_addr(&self.http, &self.addrs, path, method, body).await
    }

    /// The cluster version string as currently reported.
    pub async fn cluster_version(&self) -> Result<String> {
        let bytes = self.request(CLUSTER_VERSION_PREFIX, Method::GET, None).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Number of regions whose start key falls in `[start_key, end_key)`.
    /// An empty end key means no upper bound.
    pub async fn region_count(&self, start_key: &[u8], end_key: &[u8]) -> Result<u64> {
        // Stores report region boundaries to the control plane in
        // memcomparable format, so the query keys must match.
        let start = percent_encode_key(&codec::encode_bytes(start_key));
        let end = if end_key.is_empty() {
            String::new()
        } else {
            percent_encode_key(&codec::encode_bytes(end_key))
        };
        let path = format!("{REGION_STATS_PREFIX}?start_key={start}&end_key={end}");
        let bytes = self.request(&path, Method::GET, None).await?;
        let stats: RegionStats = serde_json::from_slice(&bytes)?;
        Ok(stats.count)
    }

    /// Names of the currently active schedulers.
    pub async fn list_schedulers(&self) -> Result<Vec<String>> {
        let bytes = self.request(SCHEDULER_PREFIX, Method::GET, None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The current schedule config.
    pub async fn schedule_config(&self) -> Result<Map<String, Value>> {
        let bytes = self.request(SCHEDULE_CONFIG_PREFIX, Method::GET, None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Override schedule-config values. With a TTL the override
    /// self-expires if never renewed (requires
    /// [`pause_extension_supported`](Self::pause_extension_supported)).
    pub async fn update_schedule_config(
        &self,
        cfg: &Map<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        post_schedule_config(&self.http, &self.addrs, cfg, ttl).await
    }

    /// Reset the overridden keys to their factory defaults, for clusters
    /// whose saved config was lost.
    pub async fn reset_default_schedule_config(&self) -> Result<()> {
        let defaults = default_schedule_config();
        info!(config = ?defaults, "resetting schedule config to defaults");
        self.update_schedule_config(&defaults, None).await
    }

    /// Suspend cluster rebalancing for a bulk operation.
    ///
    /// Captures the current schedule config, pauses the allow-listed
    /// schedulers, and overrides the scheduling limits. On a control plane
    /// with TTL support the override is kept alive by the pause session's
    /// renewal task; on older clusters it is applied permanently first and
    /// only the schedulers are paused.
    ///
    /// On failure the returned [`PauseFailure`] carries an undo handle
    /// reflecting the best-known snapshot, so the caller can still attempt
    /// cleanup.
    pub async fn remove_schedulers(&self) -> std::result::Result<UndoHandle, PauseFailure> {
        let stores = self.directory.list_stores().await.map_err(|error| PauseFailure {
            undo: UndoHandle::nop(),
            error,
        })?;
        let schedule_cfg = self.schedule_config().await.map_err(|error| PauseFailure {
            undo: UndoHandle::nop(),
            error,
        })?;

        let disable_cfg = compute_override(&schedule_cfg, stores.len());
        debug!(config = ?schedule_cfg, "saved schedule config");
        let mut snapshot = ClusterSnapshot {
            schedulers: Vec::new(),
            schedule_cfg,
        };

        let existing = match self.list_schedulers().await {
            Ok(names) => names,
            Err(error) => {
                return Err(PauseFailure {
                    undo: UndoHandle::from_snapshot(snapshot),
                    error,
                })
            }
        };
        let to_pause: Vec<String> = existing
            .into_iter()
            .filter(|name| SCHEDULER_ALLOW_LIST.contains(&name.as_str()))
            .collect();

        let outcome = if self.pause_extension_supported() {
            self.pause_schedulers_and_config(to_pause, Some(disable_cfg))
                .await
        } else {
            // Clusters without TTL support get the override applied
            // permanently; only the schedulers are paused.
            if let Err(error) = self.update_schedule_config(&disable_cfg, None).await {
                return Err(PauseFailure {
                    undo: UndoHandle::from_snapshot(snapshot),
                    error,
                });
            }
            self.pause_schedulers_and_config(to_pause, None).await
        };

        match outcome {
            Ok(paused) => {
                snapshot.schedulers = paused;
                Ok(UndoHandle::from_snapshot(snapshot))
            }
            Err((paused, error)) => {
                snapshot.schedulers = paused;
                Err(PauseFailure {
                    undo: UndoHandle::from_snapshot(snapshot),
                    error,
                })
            }
        }
    }

    /// Close the coordinator, terminating any live renewal task. The
    /// node-directory client is released when the coordinator itself is
    /// dropped.
    pub fn close(&self) {
        info!("closing cluster coordinator");
        let _ = self.shutdown_tx.send(true);
        // Wake a renewal task that has not observed the shutdown flag yet;
        // try_send never blocks on the capacity-1 channel.
        if let Some(stop_tx) = self.stop_sender_slot().as_ref() {
            let _ = stop_tx.try_send(());
        }
    }
}

fn build_http_client(options: &ConnectOptions) -> Result<Client> {
    let mut builder = Client::builder().timeout(options.request_timeout);
    if let Some(tls) = &options.tls {
        let ca = std::fs::read(&tls.ca_path)?;
        let cert = std::fs::read(&tls.cert_path)?;
        let key = std::fs::read(&tls.key_path)?;
        let mut identity_pem = cert;
        identity_pem.extend_from_slice(&key);
        builder = builder
            .use_rustls_tls()
            .add_root_certificate(Certificate::from_pem(&ca)?)
            .identity(Identity::from_pem(&identity_pem)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quoted_version_with_newline() {
        let version = ClusterVersion::parse_lossy(b"\"v4.0.8\"\n");
        assert_eq!(version, ClusterVersion::new(4, 0, 8));
    }

    #[test]
    fn test_parse_plain_version() {
        assert_eq!(
            ClusterVersion::parse("5.2.11"),
            Some(ClusterVersion::new(5, 2, 11))
        );
        assert_eq!(
            ClusterVersion::parse("v4.0.8-rc.2"),
            Some(ClusterVersion::new(4, 0, 8))
        );
    }

    #[test]
    fn test_unparseable_version_falls_back_to_zero() {
        let version = ClusterVersion::parse_lossy(b"not-a-version");
        assert_eq!(version, ClusterVersion::new(0, 0, 0));
        assert_eq!(
            ClusterVersion::parse_lossy(b""),
            ClusterVersion::new(0, 0, 0)
        );
    }

    #[test]
    fn test_pause_extension_threshold() {
        assert!(ClusterVersion::new(4, 0, 8) >= PAUSE_EXTENSION_VERSION);
        assert!(ClusterVersion::new(4, 0, 7) < PAUSE_EXTENSION_VERSION);
        assert!(ClusterVersion::new(5, 0, 0) >= PAUSE_EXTENSION_VERSION);
        assert!(ClusterVersion::new(3, 9, 9) < PAUSE_EXTENSION_VERSION);
    }

    #[test]
    fn test_percent_encode_key_escapes_binary() {
        assert_eq!(percent_encode_key(b"abc"), "abc");
        assert_eq!(percent_encode_key(&[0x00, 0xFF]), "%00%FF");
        assert_eq!(percent_encode_key(b"a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(percent_encode_key(b"a/b"), "a%2Fb");
    }
}
