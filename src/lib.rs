pub mod config;
pub mod db;
pub mod distributor;
pub mod error;
pub mod hashgen;
pub mod participation;
pub mod pool;
pub mod report;
pub mod resolver;
pub mod round;
pub mod scheduler;
pub mod sources;
pub mod types;

pub use config::{Alphabet, Endpoints, LotteryConfig, PoolConfig, PoolMode};
pub use db::{PoolMeta, Storage};
pub use distributor::{DistributionReport, Distributor, allocate_shares, target_count};
pub use error::{LotteryError, Result, SourceError};
pub use hashgen::HashGenerator;
pub use participation::{OptIn, max_tickets, opt_in};
pub use pool::TicketPool;
pub use resolver::{Resolution, WinnerResolver, find_closest_block, winning_suffix};
pub use round::RoundMachine;
pub use scheduler::{CycleReport, Lottery};
pub use sources::{BlockSource, ChainClient, DelegationSource, RewardSource};
pub use types::*;
