//! Read-only views over the store, serialized as JSON by the binary

use crate::config::LotteryConfig;
use crate::db::Storage;
use crate::error::{LotteryError, Result};
use crate::participation::max_tickets;
use crate::pool::TicketPool;
use crate::types::{Jackpot, JackpotId, Winner};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Number of winners shown on the front page
pub const TOP_WINNERS: usize = 3;

/// One page of a sorted listing, 1-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: usize,
    pub total_pages: usize,
    pub page: usize,
    pub next: Option<usize>,
    pub previous: Option<usize>,
}

impl<T> Page<T> {
    /// Slice `items`; out-of-range page numbers clamp to the first/last page
    pub fn of(items: Vec<T>, page: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let count = items.len();
        let total_pages = count.div_ceil(page_size).max(1);
        let page = page.clamp(1, total_pages);

        let items: Vec<T> = items
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        Self {
            items,
            count,
            total_pages,
            page,
            next: (page < total_pages).then_some(page + 1),
            previous: (page > 1).then_some(page - 1),
        }
    }
}

fn require(address: &str) -> Result<&str> {
    let address = address.trim();
    if address.is_empty() {
        return Err(LotteryError::MissingAddress);
    }
    Ok(address)
}

fn live_jackpot(store: &Storage) -> Result<Option<Jackpot>> {
    match store.active_jackpot_id()? {
        Some(id) => Ok(store.get_jackpot(id)?.filter(|j| j.is_active())),
        None => Ok(None),
    }
}

// =============================================================================
// COUNTDOWN
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub jackpot_id: JackpotId,
    pub draw_date: DateTime<Utc>,
    pub countdown: String,
}

/// `"{d}D : {h}H : {m}M : {s}S"` until `draw_date`, `"EXPIRED"` after
pub fn format_countdown(draw_date: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if draw_date < now {
        return "EXPIRED".to_string();
    }
    let remaining = (draw_date - now).num_seconds();
    let days = remaining / 86_400;
    let hours = (remaining % 86_400) / 3600;
    let minutes = (remaining % 3600) / 60;
    let seconds = remaining % 60;
    format!("{}D : {}H : {}M : {}S", days, hours, minutes, seconds)
}

pub fn countdown(store: &Storage, now: DateTime<Utc>) -> Result<Countdown> {
    let jackpot = live_jackpot(store)?.ok_or(LotteryError::NoActiveJackpot)?;
    Ok(Countdown {
        jackpot_id: jackpot.id,
        draw_date: jackpot.draw_date,
        countdown: format_countdown(jackpot.draw_date, now),
    })
}

// =============================================================================
// SUMMARY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// None when no jackpot is live
    pub jackpot_amount: Option<Decimal>,
    /// Tickets the delegated stake can cover, capped at the pool
    pub total_tickets: u64,
    pub participant_tickets: Option<u64>,
}

pub fn summary(store: &Storage, config: &LotteryConfig, address: Option<&str>) -> Result<Summary> {
    let pool = TicketPool::new(store, &config.pool);
    let jackpot = live_jackpot(store)?;

    let total_tickets = match &jackpot {
        Some(j) => {
            let delegated: Decimal = store
                .delegators()?
                .iter()
                .filter(|d| !d.balance.is_zero())
                .map(|d| d.balance)
                .sum();
            max_tickets(delegated, j.ticket_cost).min(pool.size()?)
        }
        None => 0,
    };

    let participant_tickets = match address.map(str::trim).filter(|a| !a.is_empty()) {
        Some(address) => Some(pool.count_by_owner(address)?),
        None => None,
    };

    Ok(Summary {
        jackpot_amount: jackpot.as_ref().map(Jackpot::amount),
        total_tickets,
        participant_tickets,
    })
}

// =============================================================================
// PARTICIPANTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantStats {
    pub address: String,
    /// Snapshot taken at opt-in
    pub balance: Decimal,
    /// Balance as of the last delegator ingestion
    pub current_balance: Option<Decimal>,
    pub is_active: bool,
    /// Cost in the latest jackpot, zero when there is none
    pub ticket_cost: Decimal,
    pub total_tickets: u64,
}

/// Statistics of a participant; `Ok(None)` when the address never opted in
pub fn participant_stats(
    store: &Storage,
    config: &LotteryConfig,
    address: &str,
) -> Result<Option<ParticipantStats>> {
    let address = require(address)?;
    let Some(participant) = store.get_participant(address)? else {
        return Ok(None);
    };

    let ticket_cost = store
        .latest_jackpot()?
        .map(|j| j.ticket_cost)
        .unwrap_or(Decimal::ZERO);
    let pool = TicketPool::new(store, &config.pool);

    Ok(Some(ParticipantStats {
        is_active: participant.is_active(store.pool_epoch()?),
        current_balance: store.get_delegator(address)?.map(|d| d.balance),
        total_tickets: pool.count_by_owner(address)?,
        address: participant.address,
        balance: participant.balance,
        ticket_cost,
    }))
}

/// Ticket hashes owned by `address`, sorted
pub fn tickets_by_address(
    store: &Storage,
    config: &LotteryConfig,
    address: &str,
    page: usize,
    page_size: usize,
) -> Result<Page<String>> {
    let address = require(address)?;
    let hashes = TicketPool::new(store, &config.pool).tickets_of(address)?;
    Ok(Page::of(hashes, page, page_size))
}

// =============================================================================
// WINNERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WinnerEntry {
    #[serde(flatten)]
    pub winner: Winner,
    pub jackpot_amount: Option<Decimal>,
    pub draw_date: Option<DateTime<Utc>>,
    /// Won by the address the listing was requested for
    pub is_winner: bool,
}

fn entries(store: &Storage, winners: Vec<Winner>, address: Option<&str>) -> Result<Vec<WinnerEntry>> {
    let jackpots: HashMap<JackpotId, Jackpot> =
        store.jackpots()?.into_iter().map(|j| (j.id, j)).collect();

    Ok(winners
        .into_iter()
        .map(|winner| {
            let jackpot = jackpots.get(&winner.jackpot_id);
            let is_winner = address.is_some() && winner.participant_address.as_deref() == address;
            WinnerEntry {
                jackpot_amount: jackpot.map(Jackpot::amount),
                draw_date: jackpot.map(|j| j.draw_date),
                is_winner,
                winner,
            }
        })
        .collect())
}

/// Winners, newest first
fn winners_newest_first(store: &Storage) -> Result<Vec<Winner>> {
    let mut winners = store.winners()?;
    winners.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.jackpot_id.cmp(&a.jackpot_id)));
    Ok(winners)
}

/// Claimed wins, newest first, flagged for `address`
pub fn recent_winners(
    store: &Storage,
    address: Option<&str>,
    page: usize,
    page_size: usize,
) -> Result<Page<WinnerEntry>> {
    let claimed: Vec<Winner> = winners_newest_first(store)?
        .into_iter()
        .filter(|w| w.participant_address.is_some())
        .collect();
    Ok(Page::of(entries(store, claimed, address)?, page, page_size))
}

/// The latest few claimed wins
pub fn top_winners(store: &Storage) -> Result<Vec<WinnerEntry>> {
    Ok(recent_winners(store, None, 1, TOP_WINNERS)?.items)
}

/// Outcomes of closed rounds, claimed or not
pub fn recent_jackpots(store: &Storage, page: usize, page_size: usize) -> Result<Page<WinnerEntry>> {
    let closed: HashMap<JackpotId, bool> = store
        .jackpots()?
        .into_iter()
        .map(|j| (j.id, !j.is_active()))
        .collect();
    let winners: Vec<Winner> = winners_newest_first(store)?
        .into_iter()
        .filter(|w| closed.get(&w.jackpot_id).copied().unwrap_or(false))
        .collect();
    Ok(Page::of(entries(store, winners, None)?, page, page_size))
}
