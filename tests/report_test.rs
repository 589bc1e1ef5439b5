//! Read-only report views
//!
//! Run with: cargo test --test report_test

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use stakepot::report;
use stakepot::resolver::record_winner;
use stakepot::{
    Alphabet, Delegator, Jackpot, JackpotDraft, LotteryConfig, LotteryError, PoolConfig, PoolMode,
    RoundMachine, Storage, TicketPool, opt_in,
};

fn config() -> LotteryConfig {
    LotteryConfig {
        pool: PoolConfig {
            alphabet: Alphabet::Hex,
            hash_length: 2,
            mode: PoolMode::Exhaustive,
            shuffle_seed: Some(11),
        },
        ..Default::default()
    }
}

fn draw_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 12, 24, 18, 0, 0).unwrap()
}

fn seeded_store() -> Storage {
    let store = Storage::temporary().unwrap();
    store
        .replace_delegators(&[
            Delegator::new("celestia1a", Decimal::from(600)),
            Delegator::new("celestia1b", Decimal::from(400)),
            Delegator::new("celestia1z", Decimal::ZERO),
        ])
        .unwrap();
    store
}

fn open_round(rounds: &RoundMachine, draw: DateTime<Utc>) -> Jackpot {
    let draft = JackpotDraft {
        reward_percentage: Decimal::from(50),
        winning_percentage: Decimal::from(10),
        ticket_cost: Decimal::from(10),
        start_distribute_time: 120,
        draw_date: draw,
    };
    let jackpot = rounds.create_jackpot(draft, Decimal::from(200), draw - Duration::days(7)).unwrap();
    rounds.switch_round().unwrap();
    jackpot
}

// =============================================================================
// ROUND VIEWS
// =============================================================================

#[test]
fn test_countdown() {
    let store = seeded_store();
    let config = config();

    let err = report::countdown(&store, draw_date()).unwrap_err();
    assert!(matches!(err, LotteryError::NoActiveJackpot));

    let jackpot = open_round(&RoundMachine::new(&store, &config), draw_date());
    let now = draw_date() - Duration::days(1) - Duration::hours(2) - Duration::minutes(3) - Duration::seconds(4);
    let countdown = report::countdown(&store, now).unwrap();
    assert_eq!(countdown.jackpot_id, jackpot.id);
    assert_eq!(countdown.draw_date, draw_date());
    assert_eq!(countdown.countdown, "1D : 2H : 3M : 4S");

    let late = report::countdown(&store, draw_date() + Duration::minutes(1)).unwrap();
    assert_eq!(late.countdown, "EXPIRED");
}

#[test]
fn test_summary() {
    let store = seeded_store();
    let config = config();

    let idle = report::summary(&store, &config, None).unwrap();
    assert_eq!(idle.jackpot_amount, None);
    assert_eq!(idle.total_tickets, 0);

    open_round(&RoundMachine::new(&store, &config), draw_date());
    opt_in(&store, &config, "celestia1a").unwrap();

    let summary = report::summary(&store, &config, Some("celestia1a")).unwrap();
    assert_eq!(summary.jackpot_amount, Some(Decimal::from(100)));
    // 1000 delegated at cost 10
    assert_eq!(summary.total_tickets, 100);
    assert_eq!(summary.participant_tickets, Some(60));

    let blank = report::summary(&store, &config, Some("  ")).unwrap();
    assert_eq!(blank.participant_tickets, None);
    let stranger = report::summary(&store, &config, Some("celestia1b")).unwrap();
    assert_eq!(stranger.participant_tickets, Some(0));
}

// =============================================================================
// PARTICIPANT VIEWS
// =============================================================================

#[test]
fn test_participant_stats() {
    let store = seeded_store();
    let config = config();
    open_round(&RoundMachine::new(&store, &config), draw_date());
    opt_in(&store, &config, "celestia1a").unwrap();

    let stats = report::participant_stats(&store, &config, "celestia1a").unwrap().unwrap();
    assert!(stats.is_active);
    assert_eq!(stats.balance, Decimal::from(600));
    assert_eq!(stats.current_balance, Some(Decimal::from(600)));
    assert_eq!(stats.ticket_cost, Decimal::from(10));
    assert_eq!(stats.total_tickets, 60);

    assert!(report::participant_stats(&store, &config, "celestia1b").unwrap().is_none());
    assert!(matches!(
        report::participant_stats(&store, &config, ""),
        Err(LotteryError::MissingAddress)
    ));
}

#[test]
fn test_tickets_by_address_pages() {
    let store = seeded_store();
    let config = config();
    open_round(&RoundMachine::new(&store, &config), draw_date());
    opt_in(&store, &config, "celestia1a").unwrap();

    let page = report::tickets_by_address(&store, &config, "celestia1a", 2, 25).unwrap();
    assert_eq!(page.count, 60);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.items.len(), 25);
    assert_eq!(page.next, Some(3));
    assert_eq!(page.previous, Some(1));
    assert!(page.items.windows(2).all(|w| w[0] < w[1]));

    let last = report::tickets_by_address(&store, &config, "celestia1a", 3, 25).unwrap();
    assert_eq!(last.items.len(), 10);

    let none = report::tickets_by_address(&store, &config, "celestia1b", 1, 10).unwrap();
    assert_eq!(none.count, 0);
    assert_eq!(none.total_pages, 1);
}

// =============================================================================
// WINNER LISTINGS
// =============================================================================

#[test]
fn test_winner_listings() {
    let store = seeded_store();
    let config = config();
    let rounds = RoundMachine::new(&store, &config);
    let pool = TicketPool::new(&store, &config.pool);

    // Round one: won by celestia1a, then closed
    let first = open_round(&rounds, draw_date());
    opt_in(&store, &config, "celestia1a").unwrap();
    let owned = pool.tickets_of("celestia1a").unwrap();
    let ticket = pool.get(&owned[0]).unwrap().unwrap();
    let after_draw = draw_date() + Duration::seconds(5);
    rounds.begin_draw(after_draw).unwrap().unwrap();
    record_winner(&store, first.id, &ticket, "https://explorer/block/1", draw_date(), after_draw).unwrap();
    rounds.settle(first.id).unwrap();

    // Round two: still live, its unclaimed outcome already recorded
    let second = open_round(&rounds, draw_date() + Duration::days(7));
    let free = pool.tickets().unwrap().into_iter().find(|t| t.owner.is_none()).unwrap();
    record_winner(&store, second.id, &free, "https://explorer/block/2", draw_date(), after_draw + Duration::days(1))
        .unwrap();

    let mine = report::recent_winners(&store, Some("celestia1a"), 1, 10).unwrap();
    assert_eq!(mine.count, 1);
    assert!(mine.items[0].is_winner);
    assert_eq!(mine.items[0].winner.jackpot_id, first.id);
    assert_eq!(mine.items[0].jackpot_amount, Some(Decimal::from(100)));
    assert_eq!(mine.items[0].draw_date, Some(draw_date()));

    let theirs = report::recent_winners(&store, Some("celestia1b"), 1, 10).unwrap();
    assert!(!theirs.items[0].is_winner);
    assert_eq!(report::top_winners(&store).unwrap().len(), 1);

    let closed = report::recent_jackpots(&store, 1, 10).unwrap();
    assert_eq!(closed.count, 1);
    assert_eq!(closed.items[0].winner.jackpot_id, first.id);
    assert_eq!(store.winners().unwrap().len(), 2);
}
