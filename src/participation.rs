//! Delegator opt-in: activation plus the tickets the balance affords

use crate::config::LotteryConfig;
use crate::db::{self, Storage};
use crate::error::{LotteryError, Result};
use crate::pool::TicketPool;
use crate::types::{Participant, RoundStatus};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Result of an opt-in request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptIn {
    pub participant: Participant,
    pub max_tickets: u64,
    /// Tickets assigned by this request; empty when already active
    pub assigned: Vec<String>,
    pub already_active: bool,
}

/// `floor(balance / ticket_cost)`, zero for a free or negative cost
pub fn max_tickets(balance: Decimal, ticket_cost: Decimal) -> u64 {
    if ticket_cost <= Decimal::ZERO || balance <= Decimal::ZERO {
        return 0;
    }
    balance
        .checked_div(ticket_cost)
        .and_then(|n| n.floor().to_u64())
        .unwrap_or(0)
}

/// Activate `address` for the current round and assign its tickets
///
/// Idempotent within a round. A failed assignment rolls the activation
/// back so the delegator can retry.
pub fn opt_in(store: &Storage, config: &LotteryConfig, address: &str) -> Result<OptIn> {
    let address = address.trim();
    if address.is_empty() {
        return Err(LotteryError::MissingAddress);
    }

    let delegator = store
        .get_delegator(address)?
        .ok_or_else(|| LotteryError::UnknownDelegator(address.to_string()))?;

    let jackpot = match store.active_jackpot_id()? {
        Some(id) => store.get_jackpot(id)?,
        None => None,
    };
    let jackpot = match jackpot {
        Some(j) if j.status == RoundStatus::Active => j,
        _ => return Err(LotteryError::NoActiveJackpot),
    };

    let max = max_tickets(delegator.balance, jackpot.ticket_cost);
    if max == 0 {
        return Err(LotteryError::NotEligible(address.to_string()));
    }

    let epoch = store.pool_epoch()?;
    let previous = store.participants.get(address.as_bytes())?;
    if let Some(bytes) = &previous {
        let existing: Participant = db::decode(bytes)?;
        if existing.is_active(epoch) {
            debug!("{} already active in generation {}", address, epoch);
            return Ok(OptIn {
                participant: existing,
                max_tickets: max,
                assigned: Vec::new(),
                already_active: true,
            });
        }
    }

    // Fresh balance snapshot on every (re)activation
    let mut participant = Participant::new(address, delegator.balance);
    participant.active_epoch = Some(epoch);
    let activated = db::encode(&participant)?;

    let swapped = store.participants.compare_and_swap(
        address.as_bytes(),
        previous.as_ref(),
        Some(activated.as_slice()),
    )?;
    if swapped.is_err() {
        // A concurrent request got there first
        return match store.get_participant(address)? {
            Some(current) if current.is_active(epoch) => Ok(OptIn {
                participant: current,
                max_tickets: max,
                assigned: Vec::new(),
                already_active: true,
            }),
            _ => Err(LotteryError::PoolChanged),
        };
    }

    let pool = TicketPool::new(store, &config.pool);
    match pool.assign_in(epoch, address, max) {
        Ok(assigned) => {
            info!(
                "{} joined jackpot #{} with {} tickets",
                address,
                jackpot.id,
                assigned.len()
            );
            Ok(OptIn {
                participant,
                max_tickets: max,
                assigned,
                already_active: false,
            })
        }
        Err(e) => {
            let restored = store.participants.compare_and_swap(
                address.as_bytes(),
                Some(activated.as_slice()),
                previous.clone(),
            );
            if !matches!(restored, Ok(Ok(()))) {
                warn!("Could not roll back activation of {}", address);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_tickets() {
        assert_eq!(max_tickets(Decimal::from(10), Decimal::from(3)), 3);
        assert_eq!(max_tickets(Decimal::new(25, 1), Decimal::new(5, 1)), 5);
        assert_eq!(max_tickets(Decimal::from(2), Decimal::from(3)), 0);
    }

    #[test]
    fn test_zero_cost_affords_nothing() {
        assert_eq!(max_tickets(Decimal::from(1000), Decimal::ZERO), 0);
        assert_eq!(max_tickets(Decimal::from(1000), Decimal::from(-1)), 0);
        assert_eq!(max_tickets(Decimal::ZERO, Decimal::ONE), 0);
    }
}
