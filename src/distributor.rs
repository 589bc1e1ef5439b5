//! Stake-weighted distribution of the pre-draw ticket quota
//!
//! Inside the distribution window a `winning_percentage` share of the pool
//! is handed to active participants in proportion to their snapshotted
//! balance. Re-running before the next reset only tops up the difference.

use crate::db::Storage;
use crate::error::Result;
use crate::pool::TicketPool;
use crate::types::{Jackpot, Participant};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome of one distribution run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    /// Tickets that should be distributed by the draw
    pub target: u64,
    /// Already owned before this run
    pub already_distributed: u64,
    /// Quota this run tried to fill
    pub remaining: u64,
    /// (participant, tickets received) in allocation order
    pub allocations: Vec<(String, u64)>,
    pub total_assigned: u64,
}

impl DistributionReport {
    /// Quota met after this run
    pub fn is_complete(&self) -> bool {
        self.total_assigned >= self.remaining
    }
}

/// `floor(total × percentage / 100)`
pub fn target_count(total_tickets: u64, winning_percentage: Decimal) -> u64 {
    (Decimal::from(total_tickets) * winning_percentage / Decimal::ONE_HUNDRED)
        .floor()
        .to_u64()
        .unwrap_or(0)
}

/// Per-participant share `ceil(remaining × balance / total_balance)`
///
/// Zero total balance yields zero shares.
pub fn allocate_shares(remaining: u64, balances: &[Decimal]) -> Vec<u64> {
    let total: Decimal = balances.iter().filter(|b| b.is_sign_positive()).sum();
    if total.is_zero() {
        return vec![0; balances.len()];
    }
    let remaining = Decimal::from(remaining);
    balances
        .iter()
        .map(|balance| {
            if balance.is_sign_negative() || balance.is_zero() {
                return 0;
            }
            (remaining * balance / total).ceil().to_u64().unwrap_or(0)
        })
        .collect()
}

pub struct Distributor<'a> {
    store: &'a Storage,
    pool: TicketPool<'a>,
}

impl<'a> Distributor<'a> {
    pub fn new(store: &'a Storage, pool: TicketPool<'a>) -> Self {
        Self { store, pool }
    }

    /// Run if `now` is inside the jackpot's distribution window
    pub fn run(&self, jackpot: &Jackpot, now: DateTime<Utc>) -> Result<Option<DistributionReport>> {
        if !jackpot.in_distribution_window(now) {
            return Ok(None);
        }
        self.distribute(jackpot).map(Some)
    }

    /// Fill the remaining quota, ignoring the window
    pub fn distribute(&self, jackpot: &Jackpot) -> Result<DistributionReport> {
        let total = self.pool.size()?;
        let unassigned = self.pool.count_unassigned()?;
        let already_distributed = total.saturating_sub(unassigned);
        let target = target_count(total, jackpot.winning_percentage);
        let remaining = target.saturating_sub(already_distributed);

        let mut report = DistributionReport {
            target,
            already_distributed,
            remaining,
            ..Default::default()
        };
        if remaining == 0 {
            debug!("Distribution quota already met ({} / {})", already_distributed, target);
            return Ok(report);
        }

        let epoch = self.store.pool_epoch()?;
        let participants = self.store.active_participants(epoch)?;
        if participants.is_empty() {
            debug!("No active participants to distribute {} tickets to", remaining);
            return Ok(report);
        }

        let balances: Vec<Decimal> = participants.iter().map(|p| p.balance).collect();
        let shares = allocate_shares(remaining, &balances);
        if shares.iter().all(|&s| s == 0) {
            warn!("Active participants hold no balance, nothing distributed");
            return Ok(report);
        }

        let mut budget = remaining;
        loop {
            let before = budget;
            for (participant, &share) in participants.iter().zip(&shares) {
                if budget == 0 {
                    break;
                }
                let assigned = self.assign(participant, share.min(budget))?;
                budget -= assigned;
                if assigned > 0 {
                    report.allocations.push((participant.address.clone(), assigned));
                }
            }
            // quota consumed, or the pool ran dry under us
            if budget == 0 || budget == before {
                break;
            }
        }

        report.total_assigned = remaining - budget;
        info!(
            "Distributed {} of {} quota tickets to {} participants",
            report.total_assigned,
            remaining,
            participants.len()
        );
        Ok(report)
    }

    fn assign(&self, participant: &Participant, count: u64) -> Result<u64> {
        if count == 0 {
            return Ok(0);
        }
        Ok(self.pool.assign_up_to(&participant.address, count)?.len() as u64)
    }
}
