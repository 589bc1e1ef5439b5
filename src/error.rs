//! Error types

use crate::types::RoundStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LotteryError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("address is required")]
    MissingAddress,
    #[error("address {0} is not a delegator")]
    UnknownDelegator(String),
    #[error("no active jackpot, try again once a jackpot is set")]
    NoActiveJackpot,
    #[error("balance of {0} does not afford a ticket")]
    NotEligible(String),
    #[error("not enough tickets available: requested {requested}, available {available}")]
    InsufficientTickets { requested: u64, available: u64 },
    #[error("invalid jackpot: {0}")]
    InvalidJackpot(String),
    #[error("jackpot {0} not found")]
    JackpotNotFound(u64),
    #[error("invalid round transition {from} -> {to}")]
    InvalidTransition { from: RoundStatus, to: RoundStatus },
    #[error("ticket hash length must be at least 1, got {0}")]
    InvalidHashLength(usize),
    #[error("ticket space of {0} combinations exceeds the pool limit")]
    PoolTooLarge(u64),
    #[error("ticket pool was regenerated during assignment")]
    PoolChanged,
}

impl LotteryError {
    /// Caller supplied bad input; no side effects happened
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LotteryError::MissingAddress
                | LotteryError::UnknownDelegator(_)
                | LotteryError::NotEligible(_)
                | LotteryError::InsufficientTickets { .. }
                | LotteryError::InvalidJackpot(_)
        )
    }

    /// Temporary condition, retry later
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LotteryError::NoActiveJackpot | LotteryError::PoolChanged)
    }
}

pub type Result<T> = std::result::Result<T, LotteryError>;

/// Failure talking to an external collaborator
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
}
