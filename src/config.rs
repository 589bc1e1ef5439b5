//! Runtime configuration passed explicitly into every component

use crate::types::{
    DEFAULT_HASH_LENGTH, DEFAULT_START_DISTRIBUTE_MINUTES, MIN_START_DISTRIBUTE_MINUTES,
    SHARE_SCALE,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DIGITS_UPPER: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const HEX_UPPER: &[u8] = b"0123456789ABCDEF";

/// Character set of ticket hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alphabet {
    /// 0-9 A-F, same space as block hash suffixes
    Hex,
    /// 0-9 A-Z
    Alphanumeric,
}

impl Alphabet {
    pub fn chars(self) -> &'static [u8] {
        match self {
            Alphabet::Hex => HEX_UPPER,
            Alphabet::Alphanumeric => DIGITS_UPPER,
        }
    }

    pub fn size(self) -> usize {
        self.chars().len()
    }

    pub fn contains(self, c: char) -> bool {
        c.is_ascii() && self.chars().contains(&(c as u8))
    }
}

impl FromStr for Alphabet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hex" => Ok(Alphabet::Hex),
            "alnum" | "alphanumeric" => Ok(Alphabet::Alphanumeric),
            other => Err(format!("unknown alphabet '{}', use: hex, alnum", other)),
        }
    }
}

/// How the pool is populated on reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolMode {
    /// Every combination, shuffled once
    Exhaustive,
    /// Random distinct hashes, capped at the combination space
    Sampled(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub alphabet: Alphabet,
    pub hash_length: usize,
    pub mode: PoolMode,
    /// Fixed shuffle seed (tests, reproducible draws); entropy when None
    pub shuffle_seed: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            alphabet: Alphabet::Hex,
            hash_length: DEFAULT_HASH_LENGTH,
            mode: PoolMode::Exhaustive,
            shuffle_seed: None,
        }
    }
}

/// External endpoints of the validator's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Staking REST listing of the validator's delegations
    pub delegations_url: String,
    /// Tendermint RPC `/block`
    pub block_url: String,
    /// Distribution REST commission of the validator
    pub commission_url: String,
    /// Explorer block page, `{height}` is substituted
    pub explorer_block_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        const VALOPER: &str = "celestiavaloper14v4ush42xewyeuuldf6jtdz0a7pxg5fwrlumwf";
        Self {
            delegations_url: format!(
                "https://api-celestia.mzonder.com/cosmos/staking/v1beta1/validators/{}/delegations",
                VALOPER
            ),
            block_url: "https://rpc-celestia.mzonder.com/block".to_string(),
            commission_url: format!(
                "https://api-celestia.mzonder.com/cosmos/distribution/v1beta1/validators/{}/commission",
                VALOPER
            ),
            explorer_block_url: "https://celestia.explorers.guru/block/{height}".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LotteryConfig {
    pub data_dir: PathBuf,
    pub pool: PoolConfig,
    pub endpoints: Endpoints,
    /// Denomination of the commission reward
    pub reward_denom: String,
    /// Divisor from chain micro-units to balances
    pub share_scale: u64,
    /// Delegators never eligible (validator self-bond, team wallets)
    pub excluded_addresses: Vec<String>,
    /// Total time the resolver may spend polling for a block
    pub poll_window: Duration,
    pub poll_interval: Duration,
    /// Scheduler tick
    pub cycle_interval: Duration,
    /// Delegator ingestion period
    pub ingest_interval: Duration,
    pub http_timeout: Duration,
    pub min_start_distribute_time: i64,
    pub default_start_distribute_time: i64,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            pool: PoolConfig::default(),
            endpoints: Endpoints::default(),
            reward_denom: "utia".to_string(),
            share_scale: SHARE_SCALE,
            excluded_addresses: vec![
                "celestia1eauf4n38gnandag9exlqrr6yy5y4852wdsfawx".to_string(),
                "celestia1ll34vjd8d7r0fef04yk6xs2y6gfn009dk34we7".to_string(),
            ],
            poll_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            cycle_interval: Duration::from_secs(60),
            ingest_interval: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(10),
            min_start_distribute_time: MIN_START_DISTRIBUTE_MINUTES,
            default_start_distribute_time: DEFAULT_START_DISTRIBUTE_MINUTES,
        }
    }
}

impl LotteryConfig {
    /// Explorer link for a block height
    pub fn explorer_link(&self, height: u64) -> String {
        self.endpoints
            .explorer_block_url
            .replace("{height}", &height.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_parse() {
        assert_eq!("hex".parse::<Alphabet>().unwrap(), Alphabet::Hex);
        assert_eq!("alnum".parse::<Alphabet>().unwrap(), Alphabet::Alphanumeric);
        assert!("base64".parse::<Alphabet>().is_err());
        assert_eq!(Alphabet::Hex.size(), 16);
        assert_eq!(Alphabet::Alphanumeric.size(), 36);
        assert!(Alphabet::Hex.contains('F'));
        assert!(!Alphabet::Hex.contains('G'));
    }

    #[test]
    fn test_explorer_link() {
        let config = LotteryConfig::default();
        assert_eq!(
            config.explorer_link(1234),
            "https://celestia.explorers.guru/block/1234"
        );
    }
}
