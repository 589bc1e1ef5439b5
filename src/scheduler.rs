//! Lottery service and its periodic cycle
//!
//! One cycle runs, in order: round switch, distribution (inside the
//! window), draw + winner resolution (past the deadline), settle.
//! Delegator ingestion runs on its own, slower interval. Cycles run
//! sequentially on one task and never overlap.

use crate::config::LotteryConfig;
use crate::db::{PoolMeta, Storage};
use crate::distributor::{DistributionReport, Distributor};
use crate::error::Result;
use crate::participation::{self, OptIn};
use crate::pool::TicketPool;
use crate::resolver::{Resolution, WinnerResolver};
use crate::round::RoundMachine;
use crate::sources::{BlockSource, DelegationSource, RewardSource};
use crate::types::{Jackpot, JackpotDraft, JackpotId, RoundStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// What a single cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub switched_to: Option<JackpotId>,
    pub distribution: Option<DistributionReport>,
    pub resolution: Option<Resolution>,
    pub settled: Option<JackpotId>,
}

pub struct Lottery<S> {
    store: Arc<Storage>,
    config: LotteryConfig,
    source: S,
}

impl<S> Lottery<S>
where
    S: DelegationSource + BlockSource + RewardSource,
{
    pub fn new(store: Arc<Storage>, config: LotteryConfig, source: S) -> Self {
        Self {
            store,
            config,
            source,
        }
    }

    pub fn store(&self) -> &Storage {
        &self.store
    }

    pub fn config(&self) -> &LotteryConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn pool(&self) -> TicketPool<'_> {
        TicketPool::new(&self.store, &self.config.pool)
    }

    fn rounds(&self) -> RoundMachine<'_> {
        RoundMachine::new(&self.store, &self.config)
    }

    // =========================================================================
    // EXTERNAL DATA
    // =========================================================================

    /// Replace the delegator set; on source failure the previous set stays
    pub async fn ingest_delegators(&self) -> Option<usize> {
        let delegators = match self.source.delegations().await {
            Ok(d) => d,
            Err(e) => {
                warn!("Delegator ingestion skipped: {}", e);
                return None;
            }
        };

        match self.store.replace_delegators(&delegators) {
            Ok(count) => {
                info!("Ingested {} delegators", count);
                Some(count)
            }
            Err(e) => {
                error!("Failed to store delegators: {}", e);
                None
            }
        }
    }

    /// Current commission, zero when the source is unavailable
    pub async fn fetch_reward(&self) -> Decimal {
        match self.source.commission().await {
            Ok(reward) => reward,
            Err(e) => {
                warn!("Reward fetch failed, using zero: {}", e);
                Decimal::ZERO
            }
        }
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    pub async fn create_jackpot(&self, draft: JackpotDraft, now: DateTime<Utc>) -> Result<Jackpot> {
        let reward = self.fetch_reward().await;
        self.rounds().create_jackpot(draft, reward, now)
    }

    pub fn opt_in(&self, address: &str) -> Result<OptIn> {
        participation::opt_in(&self.store, &self.config, address)
    }

    /// Regenerate the pool outside of a round transition
    pub fn reset_pool(&self) -> Result<PoolMeta> {
        self.pool().reset()
    }

    /// Generate the first pool if none was ever published
    pub fn ensure_pool(&self) -> Result<PoolMeta> {
        let meta = self.store.pool_meta()?;
        if meta.size > 0 {
            return Ok(meta);
        }
        info!("No ticket pool yet, generating one");
        self.reset_pool()
    }

    // =========================================================================
    // CYCLE
    // =========================================================================

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let rounds = self.rounds();
        let mut report = CycleReport {
            switched_to: rounds.switch_round()?,
            ..Default::default()
        };

        if let Some(jackpot) = rounds.active_jackpot()? {
            if jackpot.status == RoundStatus::Active && !jackpot.is_past_draw(now) {
                let distributor = Distributor::new(&self.store, self.pool());
                if let Some(distribution) = distributor.run(&jackpot, now)? {
                    if distribution.is_complete() && !jackpot.distributed_status {
                        rounds.mark_distributed(jackpot.id)?;
                    }
                    report.distribution = Some(distribution);
                }
            }
        }

        if let Some(drawn) = rounds.begin_draw(now)? {
            let resolver = WinnerResolver::new(&self.store, &self.config, &self.source);
            let resolution = resolver.resolve(&drawn, now).await?;
            rounds.settle(drawn.id)?;
            report.resolution = Some(resolution);
            report.settled = Some(drawn.id);
        }

        Ok(report)
    }

    /// Run until the returned future is dropped
    pub async fn run(&self) {
        let mut ingest = interval(self.config.ingest_interval);
        ingest.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycle = interval(self.config.cycle_interval);
        cycle.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = ingest.tick() => {
                    self.ingest_delegators().await;
                }
                _ = cycle.tick() => {
                    match self.run_cycle(Utc::now()).await {
                        Ok(report) => debug!("Cycle done: {:?}", report),
                        Err(e) => error!("Cycle failed: {}", e),
                    }
                }
            }
        }
    }
}
