//! Sled-backed store: one tree per table, bincode-encoded records
//!
//! Tables:
//! - `delegators`    address → Delegator
//! - `participants`  address → Participant
//! - `tickets`       epoch ‖ hash → Ticket
//! - `unassigned`    epoch ‖ position → hash (shuffled order)
//! - `owned`         epoch ‖ owner ‖ 0x00 ‖ hash → ()
//! - `claims`        epoch ‖ hash → claim token (row locks)
//! - `jackpots`      id → Jackpot
//! - `jackpot_dates` draw_date ‖ id → () (latest-by-date index)
//! - `winners`       jackpot id → Winner
//! - `meta`          pool generation, active jackpot pointer

use crate::error::{LotteryError, Result};
use crate::types::{Delegator, Epoch, Jackpot, JackpotId, Participant, Ticket, Winner};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{TransactionError, TransactionResult};
use sled::{Batch, Db, IVec, Transactional, Tree};
use std::path::Path;
use tracing::debug;

pub(crate) const META_POOL: &[u8] = b"pool";
pub(crate) const META_ACTIVE: &[u8] = b"active_jackpot";

/// Current pool generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMeta {
    pub epoch: Epoch,
    /// Tickets in the generation
    pub size: u64,
}

pub struct Storage {
    db: Db,
    pub(crate) delegators: Tree,
    pub(crate) participants: Tree,
    pub(crate) tickets: Tree,
    pub(crate) unassigned: Tree,
    pub(crate) owned: Tree,
    pub(crate) claims: Tree,
    pub(crate) jackpots: Tree,
    pub(crate) jackpot_dates: Tree,
    pub(crate) winners: Tree,
    pub(crate) meta: Tree,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref().join("stakepot.sled"))?;
        Self::from_db(db)
    }

    /// In-memory store, removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            delegators: db.open_tree("delegators")?,
            participants: db.open_tree("participants")?,
            tickets: db.open_tree("tickets")?,
            unassigned: db.open_tree("unassigned")?,
            owned: db.open_tree("owned")?,
            claims: db.open_tree("claims")?,
            jackpots: db.open_tree("jackpots")?,
            jackpot_dates: db.open_tree("jackpot_dates")?,
            winners: db.open_tree("winners")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Monotonic id shared by jackpots, epochs and claim tokens
    pub(crate) fn generate_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    // =========================================================================
    // META
    // =========================================================================

    pub fn pool_meta(&self) -> Result<PoolMeta> {
        match self.meta.get(META_POOL)? {
            Some(bytes) => decode(&bytes),
            None => Ok(PoolMeta::default()),
        }
    }

    pub fn pool_epoch(&self) -> Result<Epoch> {
        Ok(self.pool_meta()?.epoch)
    }

    pub fn active_jackpot_id(&self) -> Result<Option<JackpotId>> {
        Ok(self.meta.get(META_ACTIVE)?.map(|v| decode_id(&v)))
    }

    // =========================================================================
    // DELEGATORS
    // =========================================================================

    /// Replace the whole delegator set in one transaction
    pub fn replace_delegators(&self, delegators: &[Delegator]) -> Result<usize> {
        let stale: Vec<IVec> = self
            .delegators
            .iter()
            .keys()
            .collect::<std::result::Result<_, _>>()?;

        let mut encoded = Vec::with_capacity(delegators.len());
        for d in delegators {
            encoded.push((d.address.as_bytes().to_vec(), encode(d)?));
        }

        let written = tx(self.delegators.transaction(|tree| {
            for key in &stale {
                tree.remove(key.clone())?;
            }
            for (key, value) in &encoded {
                tree.insert(key.as_slice(), value.as_slice())?;
            }
            Ok(encoded.len())
        }))?;

        debug!("Replaced {} delegators with {}", stale.len(), written);
        Ok(written)
    }

    pub fn get_delegator(&self, address: &str) -> Result<Option<Delegator>> {
        get(&self.delegators, address.as_bytes())
    }

    pub fn delegators(&self) -> Result<Vec<Delegator>> {
        values(&self.delegators)
    }

    /// Sum of all delegator balances
    pub fn total_delegation(&self) -> Result<Decimal> {
        Ok(self.delegators()?.iter().map(|d| d.balance).sum())
    }

    // =========================================================================
    // PARTICIPANTS
    // =========================================================================

    pub fn get_participant(&self, address: &str) -> Result<Option<Participant>> {
        get(&self.participants, address.as_bytes())
    }

    pub fn put_participant(&self, participant: &Participant) -> Result<()> {
        self.participants
            .insert(participant.address.as_bytes(), encode(participant)?)?;
        Ok(())
    }

    /// Participants activated in `epoch`, ordered by address
    pub fn active_participants(&self, epoch: Epoch) -> Result<Vec<Participant>> {
        Ok(values::<Participant>(&self.participants)?
            .into_iter()
            .filter(|p| p.is_active(epoch))
            .collect())
    }

    // =========================================================================
    // TICKETS
    // =========================================================================

    pub fn get_ticket(&self, epoch: Epoch, hash: &str) -> Result<Option<Ticket>> {
        get(&self.tickets, &ticket_key(epoch, hash))
    }

    /// Write a generation's tickets in batches, invisible until its epoch is published
    pub(crate) fn write_generation(&self, epoch: Epoch, hashes: &[String], batch_size: usize) -> Result<()> {
        let batch_size = batch_size.max(1);
        for (chunk_idx, chunk) in hashes.chunks(batch_size).enumerate() {
            let mut tickets = Batch::default();
            let mut unassigned = Batch::default();
            for (i, hash) in chunk.iter().enumerate() {
                let position = (chunk_idx * batch_size + i) as u32;
                let ticket = Ticket::unassigned(hash.clone(), position);
                tickets.insert(ticket_key(epoch, hash), encode(&ticket)?);
                unassigned.insert(unassigned_key(epoch, position), hash.as_bytes());
            }
            self.tickets.apply_batch(tickets)?;
            self.unassigned.apply_batch(unassigned)?;
        }
        Ok(())
    }

    /// Drop every ticket row of generations older than `keep_from`
    pub(crate) fn purge_generations_before(&self, keep_from: Epoch) -> Result<usize> {
        let mut removed = 0;
        for tree in [&self.tickets, &self.unassigned, &self.owned, &self.claims] {
            let keys: Vec<IVec> = tree
                .range(..keep_from.to_be_bytes())
                .keys()
                .collect::<std::result::Result<_, _>>()?;
            removed += remove_keys(tree, keys)?;
        }
        Ok(removed)
    }

    /// Drop a single generation (abandoned before publication)
    pub(crate) fn purge_generation(&self, epoch: Epoch) -> Result<usize> {
        let prefix = epoch.to_be_bytes();
        let mut removed = 0;
        for tree in [&self.tickets, &self.unassigned, &self.owned, &self.claims] {
            let keys: Vec<IVec> = tree
                .scan_prefix(prefix)
                .keys()
                .collect::<std::result::Result<_, _>>()?;
            removed += remove_keys(tree, keys)?;
        }
        Ok(removed)
    }

    // =========================================================================
    // JACKPOTS
    // =========================================================================

    pub fn get_jackpot(&self, id: JackpotId) -> Result<Option<Jackpot>> {
        get(&self.jackpots, &id.to_be_bytes())
    }

    pub fn insert_jackpot(&self, jackpot: &Jackpot) -> Result<()> {
        let value = encode(jackpot)?;
        let date_key = jackpot_date_key(jackpot.draw_date, jackpot.id);
        tx((&self.jackpots, &self.jackpot_dates).transaction(|(jackpots, dates)| {
            jackpots.insert(jackpot.id.to_be_bytes().to_vec(), value.as_slice())?;
            dates.insert(date_key.as_slice(), Vec::<u8>::new())?;
            Ok(())
        }))
    }

    /// Jackpot with the latest draw date
    pub fn latest_jackpot(&self) -> Result<Option<Jackpot>> {
        match self.jackpot_dates.last()? {
            Some((key, _)) => self.get_jackpot(id_from_date_key(&key)),
            None => Ok(None),
        }
    }

    pub fn jackpots(&self) -> Result<Vec<Jackpot>> {
        values(&self.jackpots)
    }

    // =========================================================================
    // WINNERS
    // =========================================================================

    pub fn get_winner(&self, jackpot_id: JackpotId) -> Result<Option<Winner>> {
        get(&self.winners, &jackpot_id.to_be_bytes())
    }

    pub fn winners(&self) -> Result<Vec<Winner>> {
        values(&self.winners)
    }
}

// =============================================================================
// KEYS
// =============================================================================

pub(crate) fn ticket_key(epoch: Epoch, hash: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + hash.len());
    key.extend_from_slice(&epoch.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

pub(crate) fn unassigned_key(epoch: Epoch, position: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(12);
    key.extend_from_slice(&epoch.to_be_bytes());
    key.extend_from_slice(&position.to_be_bytes());
    key
}

pub(crate) fn owned_prefix(epoch: Epoch, owner: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + owner.len());
    key.extend_from_slice(&epoch.to_be_bytes());
    key.extend_from_slice(owner.as_bytes());
    key.push(0);
    key
}

pub(crate) fn owned_key(epoch: Epoch, owner: &str, hash: &str) -> Vec<u8> {
    let mut key = owned_prefix(epoch, owner);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Order-preserving: sign bit flipped so pre-1970 dates sort first
fn jackpot_date_key(draw_date: DateTime<Utc>, id: JackpotId) -> Vec<u8> {
    let millis = (draw_date.timestamp_millis() as u64) ^ (1 << 63);
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&millis.to_be_bytes());
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn id_from_date_key(key: &[u8]) -> JackpotId {
    decode_id(&key[8..])
}

pub(crate) fn decode_id(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[8 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    u64::from_be_bytes(buf)
}

// =============================================================================
// CODEC
// =============================================================================

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn get<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

fn values<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for item in tree.iter().values() {
        out.push(decode(&item?)?);
    }
    Ok(out)
}

fn remove_keys(tree: &Tree, keys: Vec<IVec>) -> Result<usize> {
    let count = keys.len();
    let mut batch = Batch::default();
    for key in keys {
        batch.remove(key);
    }
    tree.apply_batch(batch)?;
    Ok(count)
}

/// Flatten a sled transaction result
pub(crate) fn tx<T>(result: TransactionResult<T, LotteryError>) -> Result<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => LotteryError::Storage(e),
    })
}
