//! External collaborators: delegation listing, chain head, validator commission
//!
//! The traits are what the engine consumes; `ChainClient` implements all
//! three against Cosmos REST and Tendermint RPC with `reqwest`.

use crate::config::LotteryConfig;
use crate::error::SourceError;
use crate::types::{BlockInfo, Delegator};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::future::Future;
use std::str::FromStr;
use tracing::debug;

/// Upper bound on delegation pages followed in one listing
const MAX_DELEGATION_PAGES: usize = 10_000;

/// Chain head provider, polled repeatedly during a draw
pub trait BlockSource {
    fn latest_block(&self) -> impl Future<Output = Result<BlockInfo, SourceError>> + Send;
}

/// Full delegator listing of the validator
pub trait DelegationSource {
    fn delegations(&self) -> impl Future<Output = Result<Vec<Delegator>, SourceError>> + Send;
}

/// Current commission reward of the validator
pub trait RewardSource {
    fn commission(&self) -> impl Future<Output = Result<Decimal, SourceError>> + Send;
}

// =============================================================================
// WIRE FORMATS
// =============================================================================

#[derive(Debug, Deserialize)]
struct DelegationsPage {
    #[serde(default)]
    delegation_responses: Vec<DelegationResponse>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct DelegationResponse {
    delegation: Delegation,
}

#[derive(Debug, Deserialize)]
struct Delegation {
    delegator_address: String,
    shares: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    result: BlockResult,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block_id: BlockId,
    block: Block,
}

#[derive(Debug, Deserialize)]
struct BlockId {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: String,
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CommissionResponse {
    commission: CommissionInner,
}

#[derive(Debug, Deserialize)]
struct CommissionInner {
    #[serde(default)]
    commission: Vec<Coin>,
}

#[derive(Debug, Deserialize)]
struct Coin {
    denom: String,
    amount: String,
}

// =============================================================================
// PARSING
// =============================================================================

/// Parse a chain decimal string, dropping digits beyond Decimal's precision
pub fn parse_amount(raw: &str) -> Result<Decimal, SourceError> {
    let raw = raw.trim();
    if !raw.is_ascii() {
        return Err(SourceError::Malformed(format!("amount '{}' is not ASCII", raw)));
    }
    let trimmed = match raw.split_once('.') {
        Some((int, frac)) if frac.len() > 8 => format!("{}.{}", int, &frac[..8]),
        _ => raw.to_string(),
    };
    Decimal::from_str(&trimmed).map_err(|e| SourceError::Malformed(format!("amount '{}': {}", raw, e)))
}

fn scaled(raw: &str, scale: u64) -> Result<Decimal, SourceError> {
    Ok(parse_amount(raw)? / Decimal::from(scale.max(1)))
}

/// One page of delegations, with the continuation key if any
pub fn parse_delegations_page(
    body: &str,
    scale: u64,
    excluded: &HashSet<String>,
) -> Result<(Vec<Delegator>, Option<String>), SourceError> {
    let page: DelegationsPage =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    let mut delegators = Vec::with_capacity(page.delegation_responses.len());
    for response in page.delegation_responses {
        let delegation = response.delegation;
        if excluded.contains(&delegation.delegator_address) {
            continue;
        }
        delegators.push(Delegator::new(
            delegation.delegator_address,
            scaled(&delegation.shares, scale)?,
        ));
    }

    let next_key = page
        .pagination
        .and_then(|p| p.next_key)
        .filter(|k| !k.is_empty());
    Ok((delegators, next_key))
}

pub fn parse_block(body: &str) -> Result<BlockInfo, SourceError> {
    let response: BlockResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;
    let header = response.result.block.header;
    let height = header
        .height
        .parse::<u64>()
        .map_err(|e| SourceError::Malformed(format!("height '{}': {}", header.height, e)))?;

    Ok(BlockInfo {
        hash: response.result.block_id.hash,
        height,
        time: header.time,
    })
}

pub fn parse_commission(body: &str, denom: &str, scale: u64) -> Result<Decimal, SourceError> {
    let response: CommissionResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;
    let coin = response
        .commission
        .commission
        .into_iter()
        .find(|c| c.denom == denom)
        .ok_or_else(|| SourceError::Malformed(format!("no {} commission entry", denom)))?;
    scaled(&coin.amount, scale)
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// Cosmos REST + Tendermint RPC client for one validator
#[derive(Clone)]
pub struct ChainClient {
    client: reqwest::Client,
    delegations_url: String,
    block_url: String,
    commission_url: String,
    reward_denom: String,
    share_scale: u64,
    excluded: HashSet<String>,
}

impl ChainClient {
    pub fn new(config: &LotteryConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            delegations_url: config.endpoints.delegations_url.clone(),
            block_url: config.endpoints.block_url.clone(),
            commission_url: config.endpoints.commission_url.clone(),
            reward_denom: config.reward_denom.clone(),
            share_scale: config.share_scale,
            excluded: config.excluded_addresses.iter().cloned().collect(),
        })
    }

    async fn get_text(&self, request: reqwest::RequestBuilder) -> Result<String, SourceError> {
        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

impl DelegationSource for ChainClient {
    async fn delegations(&self) -> Result<Vec<Delegator>, SourceError> {
        let mut delegators = Vec::new();
        let mut next_key: Option<String> = None;

        for page in 0..MAX_DELEGATION_PAGES {
            let mut request = self.client.get(&self.delegations_url);
            if let Some(key) = &next_key {
                request = request.query(&[("pagination.key", key.as_str())]);
            }
            let body = self.get_text(request).await?;
            let (batch, key) = parse_delegations_page(&body, self.share_scale, &self.excluded)?;
            debug!("Delegations page {}: {} entries", page, batch.len());
            delegators.extend(batch);

            match key {
                Some(key) => next_key = Some(key),
                None => return Ok(delegators),
            }
        }

        Err(SourceError::Malformed(format!(
            "delegation listing exceeded {} pages",
            MAX_DELEGATION_PAGES
        )))
    }
}

impl BlockSource for ChainClient {
    async fn latest_block(&self) -> Result<BlockInfo, SourceError> {
        let body = self.get_text(self.client.get(&self.block_url)).await?;
        parse_block(&body)
    }
}

impl RewardSource for ChainClient {
    async fn commission(&self) -> Result<Decimal, SourceError> {
        let body = self.get_text(self.client.get(&self.commission_url)).await?;
        parse_commission(&body, &self.reward_denom, self.share_scale)
    }
}
