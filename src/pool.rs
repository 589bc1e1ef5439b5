//! Ticket pool: generation, race-safe assignment, aggregates
//!
//! Assignment is two-phase:
//! 1. Claim: walk `unassigned` in shuffled order and take a row lock per
//!    ticket with an insert-if-absent on `claims`. A claim held by another
//!    attempt is skipped, never waited on.
//! 2. Commit: one transaction moves every claimed ticket to its owner and
//!    drops the claims. On a short claim set all claims are released first.

use crate::config::{PoolConfig, PoolMode};
use crate::db::{self, PoolMeta, Storage};
use crate::error::{LotteryError, Result};
use crate::hashgen::{HashGenerator, pool_rng};
use crate::types::{Epoch, TICKET_BATCH_SIZE, Ticket};
use sled::{IVec, Transactional};
use sled::transaction::ConflictableTransactionError;
use tracing::{debug, info, warn};

/// A ticket row locked by an in-flight assignment
#[derive(Debug, Clone)]
struct Claim {
    hash: String,
    unassigned_key: IVec,
    claim_key: Vec<u8>,
}

pub struct TicketPool<'a> {
    store: &'a Storage,
    config: &'a PoolConfig,
}

impl<'a> TicketPool<'a> {
    pub fn new(store: &'a Storage, config: &'a PoolConfig) -> Self {
        Self { store, config }
    }

    pub fn generator(&self) -> HashGenerator {
        HashGenerator::from_config(self.config)
    }

    /// Size a fresh generation will have under the current configuration
    pub fn expected_size(&self) -> u64 {
        let space = self.generator().space_size().unwrap_or(u64::MAX);
        match self.config.mode {
            PoolMode::Exhaustive => space,
            PoolMode::Sampled(count) => count.min(space),
        }
    }

    // =========================================================================
    // GENERATION
    // =========================================================================

    /// Build a new generation under a fresh epoch without publishing it
    pub(crate) fn prepare_generation(&self) -> Result<PoolMeta> {
        let mut rng = pool_rng(self.config.shuffle_seed);
        let hashes = self.generator().generate(self.config.mode, &mut rng)?;
        let epoch = self.store.generate_id()?;

        self.store.write_generation(epoch, &hashes, TICKET_BATCH_SIZE)?;
        debug!("Prepared pool generation {} ({} tickets)", epoch, hashes.len());

        Ok(PoolMeta {
            epoch,
            size: hashes.len() as u64,
        })
    }

    /// Drop everything older than the generation before `current`
    ///
    /// The previous generation stays readable for in-flight readers.
    pub(crate) fn retire_old_generations(&self, current: Epoch) {
        let Some(previous) = self.previous_epoch(current) else {
            return;
        };
        match self.store.purge_generations_before(previous) {
            Ok(removed) if removed > 0 => debug!("Purged {} stale ticket rows", removed),
            Ok(_) => {}
            Err(e) => warn!("Failed to purge stale ticket rows: {}", e),
        }
    }

    /// Epoch of the newest generation below `current`
    fn previous_epoch(&self, current: Epoch) -> Option<Epoch> {
        let (key, _) = self
            .store
            .tickets
            .range(..current.to_be_bytes())
            .next_back()?
            .ok()?;
        Some(db::decode_id(&key[..8]))
    }

    /// Regenerate the whole pool: new unassigned set, owner links gone,
    /// participants deactivated. Readers switch over in one step.
    pub fn reset(&self) -> Result<PoolMeta> {
        let prepared = self.prepare_generation()?;
        let value = db::encode(&prepared)?;
        self.store.meta.insert(db::META_POOL, value)?;

        info!(
            "Ticket pool reset: generation {} with {} tickets",
            prepared.epoch, prepared.size
        );
        self.retire_old_generations(prepared.epoch);
        Ok(prepared)
    }

    // =========================================================================
    // ASSIGNMENT
    // =========================================================================

    /// Assign exactly `count` tickets to `owner` or none at all
    pub fn assign_tickets(&self, owner: &str, count: u64) -> Result<Vec<String>> {
        self.assign_in(self.store.pool_epoch()?, owner, count)
    }

    /// All-or-nothing assignment pinned to generation `epoch`
    pub(crate) fn assign_in(&self, epoch: Epoch, owner: &str, count: u64) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let claims = self.claim(epoch, count)?;

        if (claims.len() as u64) < count {
            let available = claims.len() as u64;
            self.release(&claims);
            return Err(LotteryError::InsufficientTickets {
                requested: count,
                available,
            });
        }

        self.commit(epoch, owner, claims)
    }

    /// Assign up to `count` tickets; fewer when the pool runs dry
    pub fn assign_up_to(&self, owner: &str, count: u64) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let epoch = self.store.pool_epoch()?;
        let claims = self.claim(epoch, count)?;
        if claims.is_empty() {
            return Ok(Vec::new());
        }
        self.commit(epoch, owner, claims)
    }

    fn claim(&self, epoch: Epoch, count: u64) -> Result<Vec<Claim>> {
        let token = self.store.generate_id()?.to_be_bytes();
        let mut claims = Vec::new();

        for item in self.store.unassigned.scan_prefix(epoch.to_be_bytes()) {
            if claims.len() as u64 >= count {
                break;
            }
            let (unassigned_key, hash) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    self.release(&claims);
                    return Err(e.into());
                }
            };
            let hash = String::from_utf8_lossy(&hash).into_owned();
            let claim_key = db::ticket_key(epoch, &hash);

            let swapped = self.store.claims.compare_and_swap(
                claim_key.as_slice(),
                None as Option<&[u8]>,
                Some(&token[..]),
            );
            match swapped {
                Ok(Ok(())) => {}
                // locked by someone else
                Ok(Err(_)) => continue,
                Err(e) => {
                    self.release(&claims);
                    return Err(e.into());
                }
            }

            let claim = Claim {
                hash,
                unassigned_key,
                claim_key,
            };

            // Assigned between our scan and our claim
            match self.store.unassigned.contains_key(&claim.unassigned_key) {
                Ok(true) => claims.push(claim),
                Ok(false) => self.release(std::slice::from_ref(&claim)),
                Err(e) => {
                    claims.push(claim);
                    self.release(&claims);
                    return Err(e.into());
                }
            }
        }

        Ok(claims)
    }

    fn release(&self, claims: &[Claim]) {
        for claim in claims {
            if let Err(e) = self.store.claims.remove(&claim.claim_key) {
                warn!("Failed to release ticket {}: {}", claim.hash, e);
            }
        }
    }

    fn commit(&self, epoch: Epoch, owner: &str, claims: Vec<Claim>) -> Result<Vec<String>> {
        let store = self.store;
        let result = db::tx(
            (&store.tickets, &store.unassigned, &store.owned, &store.claims, &store.meta).transaction(
                |(tickets, unassigned, owned, claim_rows, meta)| {
                    let current = match meta.get(db::META_POOL)? {
                        Some(bytes) => db::decode::<PoolMeta>(&bytes)
                            .map_err(ConflictableTransactionError::Abort)?
                            .epoch,
                        None => 0,
                    };
                    if current != epoch {
                        return Err(ConflictableTransactionError::Abort(LotteryError::PoolChanged));
                    }

                    for claim in &claims {
                        let bytes = tickets
                            .get(claim.claim_key.as_slice())?
                            .ok_or(ConflictableTransactionError::Abort(LotteryError::PoolChanged))?;
                        let mut ticket: Ticket =
                            db::decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                        if ticket.owner.is_some() {
                            return Err(ConflictableTransactionError::Abort(LotteryError::PoolChanged));
                        }
                        ticket.owner = Some(owner.to_string());

                        let encoded = db::encode(&ticket).map_err(ConflictableTransactionError::Abort)?;
                        tickets.insert(claim.claim_key.as_slice(), encoded)?;
                        unassigned.remove(claim.unassigned_key.clone())?;
                        owned.insert(db::owned_key(epoch, owner, &claim.hash), Vec::<u8>::new())?;
                        claim_rows.remove(claim.claim_key.as_slice())?;
                    }
                    Ok(())
                },
            ),
        );

        match result {
            Ok(()) => {
                debug!("Assigned {} tickets to {}", claims.len(), owner);
                Ok(claims.into_iter().map(|c| c.hash).collect())
            }
            Err(e) => {
                self.release(&claims);
                Err(e)
            }
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn size(&self) -> Result<u64> {
        Ok(self.store.pool_meta()?.size)
    }

    pub fn count_unassigned(&self) -> Result<u64> {
        let epoch = self.store.pool_epoch()?;
        Ok(self.store.unassigned.scan_prefix(epoch.to_be_bytes()).count() as u64)
    }

    pub fn count_assigned(&self) -> Result<u64> {
        let meta = self.store.pool_meta()?;
        let unassigned = self.store.unassigned.scan_prefix(meta.epoch.to_be_bytes()).count() as u64;
        Ok(meta.size.saturating_sub(unassigned))
    }

    pub fn count_by_owner(&self, owner: &str) -> Result<u64> {
        let epoch = self.store.pool_epoch()?;
        Ok(self.store.owned.scan_prefix(db::owned_prefix(epoch, owner)).count() as u64)
    }

    /// Hashes owned by `owner`, sorted
    pub fn tickets_of(&self, owner: &str) -> Result<Vec<String>> {
        let epoch = self.store.pool_epoch()?;
        let prefix = db::owned_prefix(epoch, owner);
        let mut hashes = Vec::new();
        for key in self.store.owned.scan_prefix(&prefix).keys() {
            let key = key?;
            hashes.push(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
        }
        Ok(hashes)
    }

    pub fn get(&self, hash: &str) -> Result<Option<Ticket>> {
        let epoch = self.store.pool_epoch()?;
        self.store.get_ticket(epoch, hash)
    }

    /// Ticket whose hash ends with `suffix`
    pub fn find_by_suffix(&self, suffix: &str) -> Result<Option<Ticket>> {
        if suffix.len() == self.config.hash_length {
            return self.get(suffix);
        }
        let epoch = self.store.pool_epoch()?;
        for value in self.store.tickets.scan_prefix(epoch.to_be_bytes()).values() {
            let ticket: Ticket = db::decode(&value?)?;
            if ticket.hash.ends_with(suffix) {
                return Ok(Some(ticket));
            }
        }
        Ok(None)
    }

    /// Every hash of the current generation with its owner
    pub fn tickets(&self) -> Result<Vec<Ticket>> {
        let epoch = self.store.pool_epoch()?;
        let mut out = Vec::new();
        for value in self.store.tickets.scan_prefix(epoch.to_be_bytes()).values() {
            out.push(db::decode(&value?)?);
        }
        Ok(out)
    }
}
