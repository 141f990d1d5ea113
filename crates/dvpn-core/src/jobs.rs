//! Periodic reconciliation jobs.
//!
//! The status job pushes a liveness report; the sessions job meters every
//! live peer against its session and the ledger quota. Neither retries: the
//! first fatal error (see [`NodeError::is_fatal`]) stops the job and is
//! returned from [`Node::run`].

use crate::error::{NodeError, NodeResult};
use crate::keys::decode_identity;
use crate::ledger::{NodeStatus, SessionUsage, Status};
use crate::node::Node;
use crate::service::PeerTransferSample;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;

/// Why the sessions job removed a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// No session on record, or no new download since the last tick.
    ZeroActivity,
    /// This tick's usage pushed the subscription past its allowance.
    OverQuota,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::ZeroActivity => write!(f, "zero activity"),
            EvictionReason::OverQuota => write!(f, "over quota"),
        }
    }
}

/// Outcome of one sessions tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Peers listed by the backend.
    pub observed: usize,
    /// Usage deltas submitted for settlement.
    pub settled: Vec<SessionUsage>,
    pub evicted: Vec<(String, EvictionReason)>,
}

impl Node {
    /// Push the node's current status.
    pub async fn update_status(&self) -> NodeResult<()> {
        let status = NodeStatus {
            address: self.settings.address.clone(),
            status: Status::Active,
            peers: self.service.peers_count() as u64,
        };
        log::debug!("Updating status: {} peer(s)", status.peers);
        self.settlement.update_status(&status).await
    }

    /// One reconciliation pass over the backend's live peers.
    pub async fn update_sessions(&self, now: Instant) -> NodeResult<TickReport> {
        let samples = self.service.peers().await?;
        let mut report = TickReport {
            observed: samples.len(),
            ..TickReport::default()
        };
        let mut evicted = HashSet::new();

        for sample in &samples {
            let session = match self.sessions.get(&sample.identity) {
                Some(session) if session.download != sample.download => session,
                _ => {
                    self.evict(&sample.identity, EvictionReason::ZeroActivity).await?;
                    evicted.insert(sample.identity.clone());
                    report
                        .evicted
                        .push((sample.identity.clone(), EvictionReason::ZeroActivity));
                    continue;
                }
            };

            let elapsed = now.saturating_duration_since(session.connected_at);
            let usage = SessionUsage {
                identity: sample.identity.clone(),
                subscription_id: session.subscription_id,
                address: session.address.clone(),
                upload: counter_delta(sample, "upload", sample.upload, session.upload),
                download: counter_delta(sample, "download", sample.download, session.download),
                duration: nanos(elapsed.saturating_sub(session.duration)),
            };

            let quota = self
                .client
                .query_quota(session.subscription_id, &session.address)
                .await?
                .ok_or_else(|| {
                    NodeError::oracle(format!(
                        "No quota for {} under subscription {}",
                        session.address, session.subscription_id
                    ))
                })?;

            let over_quota = quota.exceeded_by(usage.bytes());
            report.settled.push(usage);
            if over_quota {
                self.evict(&sample.identity, EvictionReason::OverQuota).await?;
                evicted.insert(sample.identity.clone());
                report
                    .evicted
                    .push((sample.identity.clone(), EvictionReason::OverQuota));
            }
        }

        log::debug!(
            "Sessions tick: {} observed, {} settled, {} evicted",
            report.observed,
            report.settled.len(),
            report.evicted.len()
        );
        if !report.settled.is_empty() {
            self.settlement.update_sessions(&report.settled).await?;
        }

        for usage in &report.settled {
            if evicted.contains(&usage.identity) {
                continue;
            }
            if let Some(mut session) = self.sessions.get(&usage.identity) {
                session.upload = session.upload.saturating_add(usage.upload);
                session.download = session.download.saturating_add(usage.download);
                session.duration = session
                    .duration
                    .saturating_add(Duration::from_nanos(usage.duration));
                self.sessions.set(session);
            }
        }

        Ok(report)
    }

    async fn evict(&self, identity: &str, reason: EvictionReason) -> NodeResult<()> {
        log::info!("Evicting peer {} ({})", identity, reason);
        let key = decode_identity(identity)?;
        self.service.remove_peer(&key).await?;
        self.sessions.delete(identity);
        Ok(())
    }

    /// Run the status and sessions jobs until shutdown or the first error.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> NodeResult<()> {
        let mut status = {
            let node = self.clone();
            let period = node.settings.interval_status;
            tokio::spawn(schedule("status", period, shutdown.clone(), move || {
                let node = node.clone();
                async move { node.update_status().await }
            }))
        };
        let mut sessions = {
            let node = self.clone();
            let period = node.settings.interval_sessions;
            tokio::spawn(schedule("sessions", period, shutdown, move || {
                let node = node.clone();
                async move { node.update_sessions(Instant::now()).await.map(|_| ()) }
            }))
        };

        let (finished, other) = tokio::select! {
            result = &mut status => (result, sessions),
            result = &mut sessions => (result, status),
        };

        match finished {
            Ok(Ok(())) => other.await.map_err(join_error)?,
            Ok(Err(e)) => {
                other.abort();
                Err(e)
            }
            Err(e) => {
                other.abort();
                Err(join_error(e))
            }
        }
    }
}

async fn schedule<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> NodeResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = NodeResult<()>>,
{
    log::info!("Started job {} with interval {:?}", name, period);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                match tick().await {
                    Ok(()) => {}
                    Err(e) if !e.is_fatal() => {
                        log::warn!("Job {} tick skipped: {}", name, e);
                    }
                    Err(e) => {
                        log::error!("Job {} failed: {}", name, e);
                        return Err(e);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    log::info!("Stopped job {}", name);
    Ok(())
}

fn counter_delta(sample: &PeerTransferSample, name: &str, live: u64, stored: u64) -> u64 {
    if live < stored {
        log::warn!(
            "{} counter of {} went backwards ({} < {}), counting no usage",
            name,
            sample.identity,
            live,
            stored
        );
    }
    live.saturating_sub(stored)
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn join_error(e: JoinError) -> NodeError {
    NodeError::Internal(format!("Job task ended abnormally: {}", e))
}
