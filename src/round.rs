//! Jackpot round state machine
//!
//! ```text
//! PENDING ──switch──▶ ACTIVE ──draw date passed──▶ DRAWN ──resolved──▶ SETTLED
//!                       │                                                ▲
//!                       └──────────── superseded by a later jackpot ─────┘
//! ```
//!
//! Every transition is a single sled transaction over `jackpots` and `meta`
//! that re-checks the pointer it started from, so two schedulers racing on
//! the same round cannot leave two live jackpots behind.

use crate::config::LotteryConfig;
use crate::db::{self, META_ACTIVE, META_POOL, PoolMeta, Storage};
use crate::error::{LotteryError, Result};
use crate::pool::TicketPool;
use crate::types::{Jackpot, JackpotDraft, JackpotId, RoundStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use tracing::{debug, info, warn};

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<LotteryError>>;

pub struct RoundMachine<'a> {
    store: &'a Storage,
    config: &'a LotteryConfig,
}

impl<'a> RoundMachine<'a> {
    pub fn new(store: &'a Storage, config: &'a LotteryConfig) -> Self {
        Self { store, config }
    }

    fn pool(&self) -> TicketPool<'a> {
        TicketPool::new(self.store, &self.config.pool)
    }

    /// The live (active or drawing) jackpot
    pub fn active_jackpot(&self) -> Result<Option<Jackpot>> {
        match self.store.active_jackpot_id()? {
            Some(id) => self.store.get_jackpot(id),
            None => Ok(None),
        }
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Lowest acceptable ticket cost: total delegation spread over the pool
    pub fn ticket_cost_floor(&self) -> Result<Decimal> {
        let total = self.store.total_delegation()?;
        let tickets = self.pool().expected_size();
        if total.is_zero() || tickets == 0 {
            return Err(LotteryError::InvalidJackpot(
                "there are no tickets or no delegators, check both before creating a jackpot".into(),
            ));
        }
        Ok((total / Decimal::from(tickets)).round_dp(1))
    }

    /// Validate and store a new jackpot as PENDING
    pub fn create_jackpot(&self, draft: JackpotDraft, reward: Decimal, now: DateTime<Utc>) -> Result<Jackpot> {
        let percent = Decimal::ZERO..=Decimal::ONE_HUNDRED;
        if !percent.contains(&draft.reward_percentage) {
            return Err(LotteryError::InvalidJackpot("reward percentage must be within 0-100".into()));
        }
        if !percent.contains(&draft.winning_percentage) {
            return Err(LotteryError::InvalidJackpot("winning percentage must be within 0-100".into()));
        }
        if draft.start_distribute_time < self.config.min_start_distribute_time {
            return Err(LotteryError::InvalidJackpot(format!(
                "start distribute time must be at least {} minutes",
                self.config.min_start_distribute_time
            )));
        }

        let floor = self.ticket_cost_floor()?;
        if draft.ticket_cost < floor {
            return Err(LotteryError::InvalidJackpot(format!(
                "total delegation is {} over {} tickets, ticket cost must be at least {}",
                self.store.total_delegation()?.round_dp(1),
                self.pool().expected_size(),
                floor
            )));
        }

        let jackpot = Jackpot {
            id: self.store.generate_id()?,
            reward: reward.max(Decimal::ZERO),
            reward_percentage: draft.reward_percentage,
            winning_percentage: draft.winning_percentage,
            ticket_cost: draft.ticket_cost,
            start_distribute_time: draft.start_distribute_time,
            status: RoundStatus::Pending,
            draw_date: draft.draw_date,
            distributed_status: false,
            created_at: now,
        };
        self.store.insert_jackpot(&jackpot)?;

        info!(
            "Created jackpot #{} (draw {}, reward {}, ticket cost {})",
            jackpot.id, jackpot.draw_date, jackpot.reward, jackpot.ticket_cost
        );
        Ok(jackpot)
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// PENDING → ACTIVE for the latest-dated jackpot, superseding the current one
    ///
    /// No-op when the latest jackpot is already live or settled, or when the
    /// current round is mid-draw. Returns the newly activated jackpot id.
    pub fn switch_round(&self) -> Result<Option<JackpotId>> {
        let Some(latest) = self.store.latest_jackpot()? else {
            return Ok(None);
        };
        if latest.status != RoundStatus::Pending {
            return Ok(None);
        }

        let active = self.active_jackpot()?;
        if let Some(current) = &active {
            if current.status == RoundStatus::Drawn || current.draw_date >= latest.draw_date {
                return Ok(None);
            }
        }
        let expected_active = active.as_ref().map(|j| j.id);

        // Fresh generation for the new round, published with the switch
        let pool = self.pool();
        let prepared = pool.prepare_generation()?;

        let switched = db::tx((&self.store.jackpots, &self.store.meta).transaction(|(jackpots, meta)| {
            let pointer = meta.get(META_ACTIVE)?.map(|v| db::decode_id(&v));
            if pointer != expected_active {
                return Ok(false);
            }

            let mut next = load(jackpots, latest.id)?;
            if next.status != RoundStatus::Pending {
                return Ok(false);
            }

            if let Some(old_id) = expected_active {
                let mut old = load(jackpots, old_id)?;
                // a draw may have started since the pre-check
                if old.status != RoundStatus::Active || old.draw_date >= next.draw_date {
                    return Ok(false);
                }
                transition(&mut old, RoundStatus::Settled)?;
                store(jackpots, &old)?;
            }

            transition(&mut next, RoundStatus::Active)?;
            store(jackpots, &next)?;
            meta.insert(META_ACTIVE, next.id.to_be_bytes().to_vec())?;
            publish(meta, &prepared)?;
            Ok(true)
        }))?;

        if !switched {
            debug!("Round switch lost a race, discarding generation {}", prepared.epoch);
            self.store.purge_generation(prepared.epoch)?;
            return Ok(None);
        }

        match expected_active {
            Some(old) => info!("Jackpot #{} superseded by #{}", old, latest.id),
            None => info!("Jackpot #{} is now active", latest.id),
        }
        pool.retire_old_generations(prepared.epoch);
        Ok(Some(latest.id))
    }

    /// ACTIVE → DRAWN once the draw date has passed
    ///
    /// Returns the drawing jackpot, including one left DRAWN by an
    /// interrupted earlier cycle.
    pub fn begin_draw(&self, now: DateTime<Utc>) -> Result<Option<Jackpot>> {
        let Some(active) = self.active_jackpot()? else {
            return Ok(None);
        };
        match active.status {
            RoundStatus::Drawn => return Ok(Some(active)),
            RoundStatus::Active if active.is_past_draw(now) => {}
            _ => return Ok(None),
        }

        let drawn = db::tx((&self.store.jackpots, &self.store.meta).transaction(|(jackpots, meta)| {
            let pointer = meta.get(META_ACTIVE)?.map(|v| db::decode_id(&v));
            if pointer != Some(active.id) {
                return Ok(None);
            }
            let mut jackpot = load(jackpots, active.id)?;
            match jackpot.status {
                RoundStatus::Active => {
                    transition(&mut jackpot, RoundStatus::Drawn)?;
                    store(jackpots, &jackpot)?;
                    Ok(Some(jackpot))
                }
                RoundStatus::Drawn => Ok(Some(jackpot)),
                _ => Ok(None),
            }
        }))?;

        match &drawn {
            Some(jackpot) => info!("Jackpot #{} reached its draw date, drawing", jackpot.id),
            None => debug!("Jackpot #{} was superseded before its draw", active.id),
        }
        Ok(drawn)
    }

    /// DRAWN → SETTLED: reset the pool and release the active pointer
    pub fn settle(&self, jackpot_id: JackpotId) -> Result<PoolMeta> {
        let pool = self.pool();
        let prepared = pool.prepare_generation()?;

        let settled = db::tx((&self.store.jackpots, &self.store.meta).transaction(|(jackpots, meta)| {
            let mut jackpot = load(jackpots, jackpot_id)?;
            transition(&mut jackpot, RoundStatus::Settled)?;
            store(jackpots, &jackpot)?;

            let pointer = meta.get(META_ACTIVE)?.map(|v| db::decode_id(&v));
            if pointer == Some(jackpot_id) {
                meta.remove(META_ACTIVE)?;
            }
            publish(meta, &prepared)?;
            Ok(())
        }));

        if let Err(e) = settled {
            warn!("Failed to settle jackpot #{}: {}", jackpot_id, e);
            self.store.purge_generation(prepared.epoch)?;
            return Err(e);
        }

        info!(
            "Jackpot #{} settled, pool regenerated ({} tickets)",
            jackpot_id, prepared.size
        );
        pool.retire_old_generations(prepared.epoch);
        Ok(prepared)
    }

    /// Record that the distribution quota has been met
    pub fn mark_distributed(&self, jackpot_id: JackpotId) -> Result<()> {
        db::tx(self.store.jackpots.transaction(|jackpots| {
            let mut jackpot = load(jackpots, jackpot_id)?;
            if !jackpot.distributed_status {
                jackpot.distributed_status = true;
                store(jackpots, &jackpot)?;
            }
            Ok(())
        }))
    }

    /// Number of live jackpots; at most one at any time
    pub fn live_count(&self) -> Result<usize> {
        Ok(self.store.jackpots()?.iter().filter(|j| j.is_active()).count())
    }
}

// =============================================================================
// TRANSACTION HELPERS
// =============================================================================

fn load(jackpots: &TransactionalTree, id: JackpotId) -> TxResult<Jackpot> {
    let bytes = jackpots
        .get(id.to_be_bytes())?
        .ok_or(ConflictableTransactionError::Abort(LotteryError::JackpotNotFound(id)))?;
    db::decode(&bytes).map_err(ConflictableTransactionError::Abort)
}

fn store(jackpots: &TransactionalTree, jackpot: &Jackpot) -> TxResult<()> {
    let value = db::encode(jackpot).map_err(ConflictableTransactionError::Abort)?;
    jackpots.insert(jackpot.id.to_be_bytes().to_vec(), value)?;
    Ok(())
}

fn publish(meta: &TransactionalTree, pool: &PoolMeta) -> TxResult<()> {
    let value = db::encode(pool).map_err(ConflictableTransactionError::Abort)?;
    meta.insert(META_POOL, value)?;
    Ok(())
}

fn transition(jackpot: &mut Jackpot, next: RoundStatus) -> TxResult<()> {
    if !jackpot.status.can_transition_to(next) {
        return Err(ConflictableTransactionError::Abort(LotteryError::InvalidTransition {
            from: jackpot.status,
            to: next,
        }));
    }
    jackpot.status = next;
    Ok(())
}
