//! Scheduler pause sessions.
//!
//! Pausing is time-boxed: each scheduler is removed for a fixed delay and
//! comes back on its own when the delay expires. A session therefore keeps
//! a background renewal task alive that reissues the pause (and the config
//! override, when one is attached) well before the timeout. Resuming sends
//! the task a stop signal and posts a zero delay for every scheduler.

use crate::cluster::coordinator::{
    control_plane_request, post_schedule_config, ClusterCoordinator, SCHEDULER_PREFIX,
};
use crate::error::{QuiesceError, Result};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How long one pause request holds before the scheduler resumes on its
/// own. Renewals happen at a third of this.
pub const PAUSE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Serialize)]
struct PauseSchedulerBody {
    /// Pause duration in nanoseconds; zero resumes the scheduler.
    delay: i64,
}

/// Post one scheduler pause/resume request with address failover.
async fn post_scheduler_delay(
    http: &Client,
    addrs: &[String],
    name: &str,
    delay: Duration,
) -> Result<()> {
    let body = serde_json::to_value(PauseSchedulerBody {
        delay: delay.as_nanos() as i64,
    })?;
    let path = format!("{SCHEDULER_PREFIX}/{name}");
    let mut last_err = QuiesceError::ClusterUnreachable(
        "no control-plane address configured".to_string(),
    );
    for addr in addrs {
        match control_plane_request(http, addr, &path, Method::POST, Some(&body)).await {
            Ok(_) => return Ok(()),
            Err(err) => last_err = err,
        }
    }
    Err(last_err)
}

/// Pause every scheduler in caller order. Returns the names paused so far
/// together with the first error, if any; the first failure aborts the
/// pass.
async fn pause_pass(
    http: &Client,
    addrs: &[String],
    schedulers: &[String],
) -> (Vec<String>, Option<QuiesceError>) {
    let mut paused = Vec::with_capacity(schedulers.len());
    for name in schedulers {
        if let Err(err) = post_scheduler_delay(http, addrs, name, PAUSE_TIMEOUT).await {
            return (paused, Some(err));
        }
        paused.push(name.clone());
    }
    (paused, None)
}

/// Everything the renewal task needs, cloned out of the coordinator so the
/// task borrows nothing. The stop receiver belongs to this session alone; a
/// signal sent for it can never be mistaken for another session's.
struct RenewalTask {
    http: Client,
    addrs: Vec<String>,
    schedulers: Vec<String>,
    override_cfg: Option<Map<String, Value>>,
    stop_rx: mpsc::Receiver<()>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RenewalTask {
    async fn run(mut self) {
        let period = PAUSE_TIMEOUT / 3;
        let mut tick =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                // Exit signals win over a tick that became due at the same
                // time; the watch guard must not outlive its own branch.
                biased;
                _ = async { let _ = self.shutdown_rx.wait_for(|stopped| *stopped).await; } => {
                    info!("coordinator shut down, exiting pause renewal");
                    return;
                }
                _ = self.stop_rx.recv() => {
                    info!("pause renewal stopped");
                    return;
                }
                _ = tick.tick() => {
                    // A failed renewal is harmless: the worst case is an
                    // early resumption of rebalancing, so log and wait for
                    // the next tick.
                    let (_, err) = pause_pass(&self.http, &self.addrs, &self.schedulers).await;
                    if let Some(err) = err {
                        warn!(error = %err, "scheduler pause renewal failed, will retry on next tick");
                    }
                    if let Some(cfg) = &self.override_cfg {
                        if let Err(err) =
                            post_schedule_config(&self.http, &self.addrs, cfg, Some(PAUSE_TIMEOUT)).await
                        {
                            warn!(error = %err, "config override renewal failed, will retry on next tick");
                        }
                    }
                    debug!(schedulers = ?self.schedulers, "renewed scheduler pause");
                }
            }
        }
    }
}

impl ClusterCoordinator {
    /// Pause the given schedulers and optionally apply a config override,
    /// then keep both alive with a single background renewal task.
    ///
    /// Any failure during the initial pass is fatal and returned together
    /// with the names already paused, so the caller's undo handle can
    /// clean them up. Renewal-tick failures are logged and ignored.
    pub(crate) async fn pause_schedulers_and_config(
        &self,
        schedulers: Vec<String>,
        override_cfg: Option<Map<String, Value>>,
    ) -> std::result::Result<Vec<String>, (Vec<String>, QuiesceError)> {
        let (paused, err) = pause_pass(&self.http, &self.addrs, &schedulers).await;
        if let Some(err) = err {
            error!(schedulers = ?schedulers, error = %err, "failed to pause schedulers at beginning");
            return Err((paused, err));
        }
        info!(schedulers = ?schedulers, "paused schedulers");

        if let Some(cfg) = &override_cfg {
            if let Err(err) = self
                .update_schedule_config(cfg, Some(PAUSE_TIMEOUT))
                .await
            {
                error!(config = ?cfg, error = %err, "failed to apply config override at beginning");
                return Err((paused, err));
            }
            info!(config = ?cfg, "applied config override");
        }

        // Each session gets its own stop channel, so a stop sent the moment
        // this returns reaches this task and no other.
        let (stop_tx, stop_rx) = mpsc::channel(1);
        *self.stop_sender_slot() = Some(stop_tx);
        let task = RenewalTask {
            http: self.http.clone(),
            addrs: self.addrs.clone(),
            schedulers,
            override_cfg,
            stop_rx,
            shutdown_rx: self.shutdown_rx.clone(),
        };
        tokio::spawn(task.run());
        Ok(paused)
    }

    /// Resume the given schedulers.
    ///
    /// Sends the current session's renewal task its stop signal
    /// (non-blocking; the channel has capacity 1, so this never blocks
    /// even if the task already exited), then posts a zero delay for every
    /// scheduler. Per-scheduler failures are logged but never propagated:
    /// the pause's own timeout bounds how long a failed resume can matter.
    pub async fn resume_schedulers(&self, schedulers: &[String]) -> Result<()> {
        info!(schedulers = ?schedulers, "resuming schedulers");
        if let Some(stop_tx) = self.stop_sender_slot().as_ref() {
            let _ = stop_tx.try_send(());
        }

        for name in schedulers {
            match post_scheduler_delay(&self.http, &self.addrs, name, Duration::ZERO).await {
                Ok(()) => info!(scheduler = %name, "resumed scheduler"),
                Err(err) => error!(
                    scheduler = %name,
                    error = %err,
                    "failed to resume scheduler; reset it manually or wait for its pause to time out"
                ),
            }
        }
        Ok(())
    }
}
