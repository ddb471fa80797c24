//! Resolution scheduling: one background task per registered auction that
//! waits for the end time plus a grace period, then runs the resolver,
//! re-running failed passes a bounded number of times.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::config::ResolverConfig;
use crate::domain::resolution::Resolution;
use crate::ports::gateway::ConfidentialGateway;
use crate::ports::settlement::SettlementChain;
use crate::resolver::Resolver;

/// Where the scheduler gets a resolver for an auction address, and what
/// time it is on the settlement chain.
pub trait AuctionDirectory: Send + Sync + 'static {
    type Gateway: ConfidentialGateway + 'static;
    type Settlement: SettlementChain + 'static;

    fn resolver_for(
        &self,
        auction: Address,
    ) -> Result<Resolver<Self::Gateway, Self::Settlement>, ScheduleError>;

    /// Unix seconds.
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Scheduled,
    Running,
    Resolved,
    NoBids,
    Failed,
}

impl RunStatus {
    pub fn is_final(self) -> bool {
        matches!(self, RunStatus::Resolved | RunStatus::NoBids | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionStatus {
    pub status: RunStatus,
    pub end_timestamp: u64,
    /// Resolution passes started so far
    pub runs: u32,
    pub winner: Option<Address>,
    pub winning_bid: Option<U256>,
    pub final_block: Option<u64>,
    pub last_error: Option<String>,
}

impl AuctionStatus {
    fn scheduled(end_timestamp: u64) -> Self {
        Self {
            status: RunStatus::Scheduled,
            end_timestamp,
            runs: 0,
            winner: None,
            winning_bid: None,
            final_block: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub grace: Duration,
    pub rerun_delay: Duration,
    pub max_runs: u32,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::from(&ResolverConfig::default())
    }
}

impl From<&ResolverConfig> for SchedulePolicy {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            grace: config.grace,
            rerun_delay: config.rerun_delay,
            max_runs: config.max_runs,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("auction {0} is already scheduled")]
    AlreadyScheduled(Address),

    #[error("cannot reach auction {auction}: {reason}")]
    Directory { auction: Address, reason: String },
}

type StatusTable = Arc<Mutex<HashMap<Address, AuctionStatus>>>;

pub struct ResolverScheduler<D> {
    directory: Arc<D>,
    policy: SchedulePolicy,
    statuses: StatusTable,
    tasks: Mutex<HashMap<Address, AbortHandle>>,
}

impl<D: AuctionDirectory> ResolverScheduler<D> {
    pub fn new(directory: D, policy: SchedulePolicy) -> Self {
        Self {
            directory: Arc::new(directory),
            policy,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule resolution of `auction`.
    ///
    /// The end time reported by the confidential program takes precedence
    /// over `end_timestamp`. An auction may be registered again once its
    /// previous schedule failed, or while it is still waiting for its first
    /// run with a different end time.
    pub async fn register(&self, auction: Address, end_timestamp: u64) -> Result<(), ScheduleError> {
        let end_timestamp = self.effective_end(auction, end_timestamp).await;

        let mut statuses = self.statuses.lock().await;
        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = statuses.get(&auction) {
            let replaceable = existing.status == RunStatus::Scheduled
                && existing.runs == 0
                && existing.end_timestamp != end_timestamp;
            if existing.status != RunStatus::Failed && !replaceable {
                return Err(ScheduleError::AlreadyScheduled(auction));
            }
            if let Some(previous) = tasks.remove(&auction) {
                previous.abort();
            }
        }
        statuses.insert(auction, AuctionStatus::scheduled(end_timestamp));

        let wait = Duration::from_secs(end_timestamp.saturating_sub(self.directory.now()))
            + self.policy.grace;
        info!(%auction, end_timestamp, wait = ?wait, "resolution scheduled");

        let directory = self.directory.clone();
        let table = self.statuses.clone();
        let policy = self.policy.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            run_schedule(&*directory, &table, &policy, auction).await;
        });
        tasks.insert(auction, handle.abort_handle());
        Ok(())
    }

    async fn effective_end(&self, auction: Address, requested: u64) -> u64 {
        let reported = match self.directory.resolver_for(auction) {
            Ok(resolver) => resolver.end_time().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match reported {
            Ok(end) => {
                if end != requested {
                    warn!(%auction, requested, reported = end, "using the auction's own end time");
                }
                end
            }
            Err(e) => {
                debug!(%auction, error = %e, "end time unavailable, trusting the request");
                requested
            }
        }
    }

    pub async fn status(&self, auction: Address) -> Option<AuctionStatus> {
        self.statuses.lock().await.get(&auction).cloned()
    }
}

async fn run_schedule<D: AuctionDirectory>(
    directory: &D,
    statuses: &StatusTable,
    policy: &SchedulePolicy,
    auction: Address,
) {
    for run in 1..=policy.max_runs {
        update(statuses, auction, |s| {
            s.status = RunStatus::Running;
            s.runs = run;
        })
        .await;

        let outcome = match directory.resolver_for(auction) {
            Ok(resolver) => resolver.run().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(report) => {
                update(statuses, auction, |s| {
                    s.final_block = Some(report.final_block);
                    s.last_error = None;
                    match &report.resolution {
                        Resolution::Winner(w) => {
                            s.status = RunStatus::Resolved;
                            s.winner = Some(w.identity);
                            s.winning_bid = Some(w.winning_bid);
                        }
                        Resolution::NoBids => s.status = RunStatus::NoBids,
                    }
                })
                .await;
                info!(%auction, run, "resolution complete");
                return;
            }
            Err(e) => {
                warn!(%auction, run, max_runs = policy.max_runs, error = %e, "resolution run failed");
                let last = run == policy.max_runs;
                update(statuses, auction, |s| {
                    s.status = if last { RunStatus::Failed } else { RunStatus::Scheduled };
                    s.last_error = Some(e);
                })
                .await;
                if !last {
                    tokio::time::sleep(policy.rerun_delay).await;
                }
            }
        }
    }
    error!(%auction, runs = policy.max_runs, "giving up on resolution");
}

async fn update(statuses: &StatusTable, auction: Address, f: impl FnOnce(&mut AuctionStatus)) {
    if let Some(status) = statuses.lock().await.get_mut(&auction) {
        f(status);
    }
}
