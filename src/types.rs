//! Core data model: delegators, participants, tickets, jackpots, winners

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Ticket hash length used when none is configured
pub const DEFAULT_HASH_LENGTH: usize = 4;

/// Upper bound on an exhaustively enumerated pool (36^4 fits, 36^5 does not)
pub const MAX_POOL_SIZE: u64 = 2_000_000;

/// Tickets written per storage batch
pub const TICKET_BATCH_SIZE: usize = 1000;

/// Minimum minutes before the draw at which distribution may start
pub const MIN_START_DISTRIBUTE_MINUTES: i64 = 5;

/// Default distribution window in minutes
pub const DEFAULT_START_DISTRIBUTE_MINUTES: i64 = 120;

/// Micro-denomination scaling for staking amounts (utia → tia)
pub const SHARE_SCALE: u64 = 1_000_000;

/// Identifier of a jackpot row
pub type JackpotId = u64;

/// Pool generation counter; bumped on every reset
pub type Epoch = u64;

// =============================================================================
// DELEGATOR
// =============================================================================

/// Stake held with the validator, replaced wholesale on each ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegator {
    pub address: String,
    pub balance: Decimal,
}

impl Delegator {
    pub fn new(address: impl Into<String>, balance: Decimal) -> Self {
        Self {
            address: address.into(),
            balance,
        }
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Delegator that opted into the lottery
///
/// `balance` is a snapshot taken at opt-in. Activation is tied to the pool
/// epoch it happened in, so a pool reset deactivates everyone at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub address: String,
    pub balance: Decimal,
    pub active_epoch: Option<Epoch>,
}

impl Participant {
    pub fn new(address: impl Into<String>, balance: Decimal) -> Self {
        Self {
            address: address.into(),
            balance,
            active_epoch: None,
        }
    }

    #[inline]
    pub fn is_active(&self, current_epoch: Epoch) -> bool {
        self.active_epoch == Some(current_epoch)
    }
}

// =============================================================================
// TICKET
// =============================================================================

/// One point of the ticket hash space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub hash: String,
    /// Index in the generation's shuffled order
    pub position: u32,
    pub owner: Option<String>,
}

impl Ticket {
    pub fn unassigned(hash: String, position: u32) -> Self {
        Self {
            hash,
            position,
            owner: None,
        }
    }
}

// =============================================================================
// JACKPOT
// =============================================================================

/// Lifecycle of a jackpot round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundStatus {
    /// Created, not yet the current round
    Pending,
    /// Accepting participants and ticket assignments
    Active,
    /// Past the draw date, winner resolution in progress
    Drawn,
    /// Pool cleared, round closed
    Settled,
}

impl RoundStatus {
    pub fn can_transition_to(self, next: RoundStatus) -> bool {
        matches!(
            (self, next),
            (RoundStatus::Pending, RoundStatus::Active)
                | (RoundStatus::Active, RoundStatus::Drawn)
                | (RoundStatus::Active, RoundStatus::Settled)
                | (RoundStatus::Drawn, RoundStatus::Settled)
        )
    }

    /// Active and drawing rounds both count as "the" active jackpot
    pub fn is_live(self) -> bool {
        matches!(self, RoundStatus::Active | RoundStatus::Drawn)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundStatus::Pending => "pending",
            RoundStatus::Active => "active",
            RoundStatus::Drawn => "drawn",
            RoundStatus::Settled => "settled",
        };
        f.write_str(s)
    }
}

/// A jackpot round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jackpot {
    pub id: JackpotId,
    /// Validator commission at creation time
    pub reward: Decimal,
    /// Share of `reward` paid out, 0–100
    pub reward_percentage: Decimal,
    /// Share of the pool force-distributed before the draw, 0–100
    pub winning_percentage: Decimal,
    pub ticket_cost: Decimal,
    /// Minutes before `draw_date` at which distribution starts
    pub start_distribute_time: i64,
    pub status: RoundStatus,
    pub draw_date: DateTime<Utc>,
    pub distributed_status: bool,
    pub created_at: DateTime<Utc>,
}

impl Jackpot {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.is_live()
    }

    /// Payout promised to the winner
    pub fn amount(&self) -> Decimal {
        self.reward * self.reward_percentage / Decimal::ONE_HUNDRED
    }

    /// Inside the pre-draw distribution window
    pub fn in_distribution_window(&self, now: DateTime<Utc>) -> bool {
        let remaining = self.draw_date - now;
        remaining.num_seconds() < self.start_distribute_time.saturating_mul(60)
    }

    pub fn is_past_draw(&self, now: DateTime<Utc>) -> bool {
        now > self.draw_date
    }
}

/// Administrative input for a new jackpot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JackpotDraft {
    pub reward_percentage: Decimal,
    pub winning_percentage: Decimal,
    pub ticket_cost: Decimal,
    pub start_distribute_time: i64,
    pub draw_date: DateTime<Utc>,
}

// =============================================================================
// WINNER
// =============================================================================

/// Outcome of a draw, at most one per jackpot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub jackpot_id: JackpotId,
    pub ticket_hash: String,
    /// None when the winning ticket was never assigned
    pub participant_address: Option<String>,
    /// Explorer link of the matched block
    pub transaction: String,
    pub closest_block_hash_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// CHAIN
// =============================================================================

/// Chain head as reported by the block source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: String,
    pub height: u64,
    pub time: DateTime<Utc>,
}
