//! Winner resolution against the chain head
//!
//! The block source is polled for a bounded window and the block whose
//! timestamp is closest to the draw date wins. Its hash suffix picks the
//! ticket; a missing match or an unreachable source still lets the round
//! settle.

use crate::config::LotteryConfig;
use crate::db::{self, Storage};
use crate::error::Result;
use crate::pool::TicketPool;
use crate::sources::BlockSource;
use crate::types::{BlockInfo, Jackpot, JackpotId, Ticket, Winner};
use chrono::{DateTime, Utc};
use sled::transaction::ConflictableTransactionError;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// How a draw ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A ticket matched; `created` is false when the record already existed
    Winner { winner: Winner, created: bool },
    /// Block found but no ticket ends with its suffix
    NoMatch { block: BlockInfo, suffix: String },
    /// No successful poll inside the window
    NoBlock,
}

impl Resolution {
    pub fn winner(&self) -> Option<&Winner> {
        match self {
            Resolution::Winner { winner, .. } => Some(winner),
            _ => None,
        }
    }
}

/// Last `length` characters of a block hash, uppercased
pub fn winning_suffix(block_hash: &str, length: usize) -> Option<String> {
    let hash = block_hash.trim();
    if length == 0 || !hash.is_ascii() || hash.len() < length {
        return None;
    }
    Some(hash[hash.len() - length..].to_ascii_uppercase())
}

/// Poll `source` until `window` elapses, keeping the block closest to `target`
///
/// Chain heads only move forward, so polling stops early once a block at or
/// after `target` has been seen.
pub async fn find_closest_block<B: BlockSource>(
    source: &B,
    target: DateTime<Utc>,
    window: Duration,
    interval: Duration,
) -> Option<BlockInfo> {
    let deadline = Instant::now() + window;
    let mut closest: Option<(BlockInfo, i64)> = None;
    let mut polls = 0u32;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        polls += 1;

        match timeout(deadline - now, source.latest_block()).await {
            Ok(Ok(block)) => {
                let diff = (block.time - target).num_milliseconds().abs();
                let better = closest.as_ref().is_none_or(|(_, best)| diff < *best);
                if better {
                    debug!("Block {} at {} is {}ms from the draw", block.height, block.time, diff);
                    closest = Some((block, diff));
                }
            }
            Ok(Err(e)) => warn!("Block poll {} failed: {}", polls, e),
            Err(_) => {
                warn!("Block poll {} timed out at the window deadline", polls);
                break;
            }
        }

        if matches!(&closest, Some((block, _)) if block.time >= target) {
            break;
        }
        if Instant::now() + interval >= deadline {
            break;
        }
        sleep(interval).await;
    }

    if closest.is_none() {
        warn!("No block received in {} polls over {:?}", polls, window);
    }
    closest.map(|(block, _)| block)
}

pub struct WinnerResolver<'a, B> {
    store: &'a Storage,
    config: &'a LotteryConfig,
    source: &'a B,
}

impl<'a, B: BlockSource> WinnerResolver<'a, B> {
    pub fn new(store: &'a Storage, config: &'a LotteryConfig, source: &'a B) -> Self {
        Self {
            store,
            config,
            source,
        }
    }

    /// Full draw for `jackpot`: find the block, match, record
    pub async fn resolve(&self, jackpot: &Jackpot, now: DateTime<Utc>) -> Result<Resolution> {
        let block = find_closest_block(
            self.source,
            jackpot.draw_date,
            self.config.poll_window,
            self.config.poll_interval,
        )
        .await;

        match block {
            Some(block) => self.resolve_with_block(jackpot.id, &block, now),
            None => {
                warn!("Jackpot #{} closes without a winner: no block", jackpot.id);
                Ok(Resolution::NoBlock)
            }
        }
    }

    /// Match a known block against the current pool
    pub fn resolve_with_block(
        &self,
        jackpot_id: JackpotId,
        block: &BlockInfo,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let pool = TicketPool::new(self.store, &self.config.pool);
        let Some(suffix) = winning_suffix(&block.hash, self.config.pool.hash_length) else {
            warn!("Block {} hash '{}' is too short to match", block.height, block.hash);
            return Ok(Resolution::NoMatch {
                block: block.clone(),
                suffix: String::new(),
            });
        };

        let Some(ticket) = pool.find_by_suffix(&suffix)? else {
            info!(
                "Jackpot #{}: no ticket ends with {} (block {})",
                jackpot_id, suffix, block.height
            );
            return Ok(Resolution::NoMatch {
                block: block.clone(),
                suffix,
            });
        };

        let link = self.config.explorer_link(block.height);
        let (winner, created) = record_winner(self.store, jackpot_id, &ticket, &link, block.time, now)?;

        match &winner.participant_address {
            Some(address) => info!(
                "Jackpot #{} won by {} with ticket {} (block {})",
                jackpot_id, address, winner.ticket_hash, block.height
            ),
            None => info!(
                "Jackpot #{} drew unassigned ticket {} (block {})",
                jackpot_id, winner.ticket_hash, block.height
            ),
        }
        Ok(Resolution::Winner { winner, created })
    }
}

/// Create the jackpot's winner once
///
/// An existing record keeps its ticket; it only picks up an owner of that
/// same ticket it did not have before.
pub fn record_winner(
    store: &Storage,
    jackpot_id: JackpotId,
    ticket: &Ticket,
    transaction: &str,
    block_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(Winner, bool)> {
    db::tx(store.winners.transaction(|winners| {
        let key = jackpot_id.to_be_bytes();
        if let Some(bytes) = winners.get(key)? {
            let mut winner: Winner = db::decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            if winner.ticket_hash == ticket.hash
                && winner.participant_address.is_none()
                && ticket.owner.is_some()
            {
                winner.participant_address = ticket.owner.clone();
                winner.transaction = transaction.to_string();
                let value = db::encode(&winner).map_err(ConflictableTransactionError::Abort)?;
                winners.insert(key.to_vec(), value)?;
            }
            return Ok((winner, false));
        }

        let winner = Winner {
            jackpot_id,
            ticket_hash: ticket.hash.clone(),
            participant_address: ticket.owner.clone(),
            transaction: transaction.to_string(),
            closest_block_hash_date: block_time,
            created_at: now,
        };
        let value = db::encode(&winner).map_err(ConflictableTransactionError::Abort)?;
        winners.insert(key.to_vec(), value)?;
        Ok((winner, true))
    }))
}
