//! Winner resolver tests with an in-process block source
//!
//! Run with: cargo test --test resolver_test

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use stakepot::{
    Alphabet, BlockInfo, BlockSource, Delegator, JackpotDraft, LotteryConfig, PoolConfig, PoolMode,
    Resolution, RoundMachine, RoundStatus, SourceError, Storage, TicketPool, WinnerResolver,
    find_closest_block,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

/// Hands out scripted polls; `None` and an empty script are failures
struct ScriptedBlocks {
    polls: Mutex<VecDeque<Option<BlockInfo>>>,
}

impl ScriptedBlocks {
    fn new(polls: Vec<Option<BlockInfo>>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
        }
    }
}

impl BlockSource for ScriptedBlocks {
    async fn latest_block(&self) -> Result<BlockInfo, SourceError> {
        let next = self.polls.lock().unwrap().pop_front().flatten();
        next.ok_or_else(|| SourceError::Malformed("rpc unreachable".into()))
    }
}

struct HangingBlocks;

impl BlockSource for HangingBlocks {
    async fn latest_block(&self) -> Result<BlockInfo, SourceError> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Err(SourceError::Malformed("too late".into()))
    }
}

fn draw_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 4, 20, 0, 0).unwrap()
}

fn block(hash: &str, height: u64, offset_secs: i64) -> BlockInfo {
    BlockInfo {
        hash: hash.to_string(),
        height,
        time: draw_date() + Duration::seconds(offset_secs),
    }
}

fn config() -> LotteryConfig {
    LotteryConfig {
        pool: PoolConfig {
            alphabet: Alphabet::Hex,
            hash_length: 2,
            mode: PoolMode::Exhaustive,
            shuffle_seed: Some(9),
        },
        poll_window: StdDuration::from_millis(300),
        poll_interval: StdDuration::from_millis(5),
        ..Default::default()
    }
}

// =============================================================================
// CLOSEST BLOCK
// =============================================================================

#[tokio::test]
async fn test_closest_block_wins() {
    let source = ScriptedBlocks::new(vec![
        Some(block("AA01", 10, -5)),
        Some(block("AA02", 11, -2)),
        Some(block("AA03", 12, 1)),
        Some(block("AA04", 13, 4)),
    ]);

    let found = find_closest_block(&source, draw_date(), StdDuration::from_secs(2), StdDuration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(found.height, 12);
    // Stopped once the head passed the draw date
    assert_eq!(source.polls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_polls_are_skipped() {
    let source = ScriptedBlocks::new(vec![
        None,
        Some(block("BB01", 20, -9)),
        None,
        Some(block("BB02", 21, -3)),
        None,
    ]);

    let found = find_closest_block(&source, draw_date(), StdDuration::from_millis(200), StdDuration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(found.height, 21);
}

#[tokio::test]
async fn test_unreachable_source_fails_soft() {
    let source = ScriptedBlocks::new(Vec::new());
    let found = find_closest_block(&source, draw_date(), StdDuration::from_millis(50), StdDuration::from_millis(5)).await;
    assert!(found.is_none());
}

#[tokio::test]
async fn test_window_bounds_hanging_source() {
    let started = std::time::Instant::now();
    let found = find_closest_block(&HangingBlocks, draw_date(), StdDuration::from_millis(100), StdDuration::from_millis(5)).await;
    assert!(found.is_none());
    assert!(started.elapsed() < StdDuration::from_secs(5));
}

// =============================================================================
// MATCHING
// =============================================================================

#[test]
fn test_suffix_winner_recorded_once() {
    let store = Storage::temporary().unwrap();
    let config = config();
    let pool = TicketPool::new(&store, &config.pool);
    pool.reset().unwrap();
    pool.assign_tickets("celestia1x", 256).unwrap();

    let source = ScriptedBlocks::new(Vec::new());
    let resolver = WinnerResolver::new(&store, &config, &source);
    let head = block("0F9C2D44E1B07A3F", 4242, 1);

    let first = resolver.resolve_with_block(1, &head, draw_date()).unwrap();
    let Resolution::Winner { winner, created } = first else {
        panic!("expected a winner");
    };
    assert!(created);
    assert_eq!(winner.ticket_hash, "3F");
    assert_eq!(winner.participant_address.as_deref(), Some("celestia1x"));
    assert_eq!(winner.transaction, "https://celestia.explorers.guru/block/4242");
    assert_eq!(winner.closest_block_hash_date, head.time);

    let second = resolver.resolve_with_block(1, &head, draw_date()).unwrap();
    assert!(matches!(second, Resolution::Winner { created: false, .. }));
    assert_eq!(store.winners().unwrap().len(), 1);
    assert_eq!(store.get_winner(1).unwrap().unwrap(), winner);
}

#[test]
fn test_lowercase_block_hash_matches() {
    let store = Storage::temporary().unwrap();
    let config = config();
    TicketPool::new(&store, &config.pool).reset().unwrap();

    let source = ScriptedBlocks::new(Vec::new());
    let resolver = WinnerResolver::new(&store, &config, &source);
    let resolution = resolver.resolve_with_block(3, &block("deadbeef", 7, 0), draw_date()).unwrap();
    assert_eq!(resolution.winner().unwrap().ticket_hash, "EF");
}

#[test]
fn test_unclaimed_win_picks_up_owner() {
    let store = Storage::temporary().unwrap();
    let config = config();
    let pool = TicketPool::new(&store, &config.pool);
    pool.reset().unwrap();

    let source = ScriptedBlocks::new(Vec::new());
    let resolver = WinnerResolver::new(&store, &config, &source);
    let head = block("C0FFEE7A3F", 99, 0);

    let unclaimed = resolver.resolve_with_block(2, &head, draw_date()).unwrap();
    assert!(unclaimed.winner().unwrap().participant_address.is_none());

    pool.assign_tickets("celestia1late", 256).unwrap();
    let claimed = resolver.resolve_with_block(2, &head, draw_date()).unwrap();
    let Resolution::Winner { winner, created } = claimed else {
        panic!("expected a winner");
    };
    assert!(!created);
    assert_eq!(winner.participant_address.as_deref(), Some("celestia1late"));
    assert_eq!(store.winners().unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_match_still_settles() {
    let store = Storage::temporary().unwrap();
    let config = LotteryConfig {
        pool: PoolConfig {
            mode: PoolMode::Sampled(16),
            ..config().pool
        },
        ..config()
    };
    store
        .replace_delegators(&[Delegator::new("celestia1x", Decimal::from(160))])
        .unwrap();

    let rounds = RoundMachine::new(&store, &config);
    let draft = JackpotDraft {
        reward_percentage: Decimal::from(100),
        winning_percentage: Decimal::ZERO,
        ticket_cost: Decimal::from(10),
        start_distribute_time: 60,
        draw_date: draw_date(),
    };
    let jackpot = rounds.create_jackpot(draft, Decimal::from(5), draw_date() - Duration::days(1)).unwrap();
    rounds.switch_round().unwrap();

    // A two-character suffix absent from the 16-ticket pool
    let present: HashSet<String> = TicketPool::new(&store, &config.pool)
        .tickets()
        .unwrap()
        .into_iter()
        .map(|t| t.hash)
        .collect();
    let missing = (0..256u32)
        .map(|i| format!("{:02X}", i))
        .find(|h| !present.contains(h))
        .unwrap();

    let source = ScriptedBlocks::new(vec![Some(block(&format!("ABCDEF{}", missing), 500, 2))]);
    let drawn = rounds.begin_draw(draw_date() + Duration::seconds(3)).unwrap().unwrap();
    let resolver = WinnerResolver::new(&store, &config, &source);
    let resolution = resolver.resolve(&drawn, draw_date() + Duration::seconds(3)).await.unwrap();

    assert!(matches!(resolution, Resolution::NoMatch { ref suffix, .. } if *suffix == missing));
    rounds.settle(jackpot.id).unwrap();
    assert!(store.get_winner(jackpot.id).unwrap().is_none());
    assert_eq!(store.get_jackpot(jackpot.id).unwrap().unwrap().status, RoundStatus::Settled);
}

#[tokio::test]
async fn test_no_block_resolution() {
    let store = Storage::temporary().unwrap();
    let config = config();
    store
        .replace_delegators(&[Delegator::new("celestia1x", Decimal::from(2560))])
        .unwrap();
    let rounds = RoundMachine::new(&store, &config);
    let draft = JackpotDraft {
        reward_percentage: Decimal::from(100),
        winning_percentage: Decimal::ZERO,
        ticket_cost: Decimal::from(10),
        start_distribute_time: 60,
        draw_date: draw_date(),
    };
    rounds.create_jackpot(draft, Decimal::ZERO, draw_date() - Duration::days(1)).unwrap();
    rounds.switch_round().unwrap();
    let drawn = rounds.begin_draw(draw_date() + Duration::seconds(1)).unwrap().unwrap();

    let source = ScriptedBlocks::new(vec![None, None]);
    let resolver = WinnerResolver::new(&store, &config, &source);
    let resolution = resolver.resolve(&drawn, draw_date()).await.unwrap();
    assert_eq!(resolution, Resolution::NoBlock);
    assert!(store.winners().unwrap().is_empty());
}
