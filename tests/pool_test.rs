//! Ticket pool tests: generation, exclusive assignment, reset
//!
//! Run with: cargo test --test pool_test

use stakepot::{Alphabet, LotteryError, PoolConfig, PoolMode, Storage, TicketPool};
use std::collections::HashSet;
use std::thread;

fn hex2() -> PoolConfig {
    PoolConfig {
        alphabet: Alphabet::Hex,
        hash_length: 2,
        mode: PoolMode::Exhaustive,
        shuffle_seed: Some(7),
    }
}

// =============================================================================
// RESET
// =============================================================================

#[test]
fn test_reset_covers_full_space_unassigned() {
    let store = Storage::temporary().unwrap();
    let config = hex2();
    let pool = TicketPool::new(&store, &config);

    let meta = pool.reset().unwrap();
    assert_eq!(meta.size, 256);
    assert_eq!(pool.size().unwrap(), 256);
    assert_eq!(pool.count_unassigned().unwrap(), 256);
    assert_eq!(pool.count_assigned().unwrap(), 0);

    let tickets = pool.tickets().unwrap();
    let hashes: HashSet<_> = tickets.iter().map(|t| t.hash.clone()).collect();
    assert_eq!(hashes.len(), 256);
    assert!(tickets.iter().all(|t| t.owner.is_none()));
    assert!(hashes.contains("00") && hashes.contains("FF"));
}

#[test]
fn test_reset_severs_owner_links() {
    let store = Storage::temporary().unwrap();
    let config = hex2();
    let pool = TicketPool::new(&store, &config);
    pool.reset().unwrap();

    let owned = pool.assign_tickets("celestia1alice", 40).unwrap();
    assert_eq!(pool.count_by_owner("celestia1alice").unwrap(), 40);
    assert_eq!(pool.get(&owned[0]).unwrap().unwrap().owner.as_deref(), Some("celestia1alice"));

    let before = pool.size().unwrap();
    let meta = pool.reset().unwrap();
    assert_eq!(meta.size, before);
    assert_eq!(pool.count_by_owner("celestia1alice").unwrap(), 0);
    assert_eq!(pool.count_unassigned().unwrap(), 256);
    assert!(pool.get(&owned[0]).unwrap().unwrap().owner.is_none());
}

#[test]
fn test_sampled_pool_is_capped() {
    let store = Storage::temporary().unwrap();
    let config = PoolConfig {
        mode: PoolMode::Sampled(100),
        ..hex2()
    };
    let pool = TicketPool::new(&store, &config);
    assert_eq!(pool.reset().unwrap().size, 100);

    let config = PoolConfig {
        mode: PoolMode::Sampled(10_000),
        ..hex2()
    };
    let pool = TicketPool::new(&store, &config);
    assert_eq!(pool.expected_size(), 256);
    assert_eq!(pool.reset().unwrap().size, 256);
}

// =============================================================================
// ASSIGNMENT
// =============================================================================

#[test]
fn test_assignment_follows_shuffled_order() {
    let store = Storage::temporary().unwrap();
    let config = hex2();
    let pool = TicketPool::new(&store, &config);
    pool.reset().unwrap();

    let assigned = pool.assign_tickets("celestia1alice", 16).unwrap();
    let mut sorted = assigned.clone();
    sorted.sort();
    // The first 16 of a shuffled space are not the first 16 hashes
    assert_ne!(sorted, (0..16).map(|i| format!("{:02X}", i)).collect::<Vec<_>>());
}

#[test]
fn test_insufficient_is_all_or_nothing() {
    let store = Storage::temporary().unwrap();
    let config = hex2();
    let pool = TicketPool::new(&store, &config);
    pool.reset().unwrap();
    pool.assign_tickets("celestia1alice", 250).unwrap();

    let err = pool.assign_tickets("celestia1bob", 10).unwrap_err();
    assert!(matches!(
        err,
        LotteryError::InsufficientTickets { requested: 10, available: 6 }
    ));
    assert!(err.is_client_error());
    assert_eq!(pool.count_by_owner("celestia1bob").unwrap(), 0);

    // Nothing left locked: the remaining six are still assignable
    assert_eq!(pool.assign_tickets("celestia1bob", 6).unwrap().len(), 6);
    assert_eq!(pool.count_unassigned().unwrap(), 0);
}

#[test]
fn test_assign_up_to_takes_what_is_left() {
    let store = Storage::temporary().unwrap();
    let config = hex2();
    let pool = TicketPool::new(&store, &config);
    pool.reset().unwrap();
    pool.assign_tickets("celestia1alice", 200).unwrap();

    let got = pool.assign_up_to("celestia1bob", 100).unwrap();
    assert_eq!(got.len(), 56);
    assert!(pool.assign_up_to("celestia1carol", 5).unwrap().is_empty());
}

#[test]
fn test_concurrent_assignments_are_disjoint() {
    let store = Storage::temporary().unwrap();
    let config = hex2();
    let pool = TicketPool::new(&store, &config);
    pool.reset().unwrap();

    let owners: Vec<String> = (0..8).map(|i| format!("celestia1owner{}", i)).collect();
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = owners
            .iter()
            .map(|owner| {
                let pool = TicketPool::new(&store, &config);
                s.spawn(move || pool.assign_tickets(owner, 40))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // 8 × 40 = 320 > 256: some attempts fail, none partially
    let mut seen = HashSet::new();
    let mut granted = 0u64;
    for (owner, result) in owners.iter().zip(results) {
        match result {
            Ok(hashes) => {
                assert_eq!(hashes.len(), 40);
                assert_eq!(pool.count_by_owner(owner).unwrap(), 40);
                for hash in hashes {
                    assert!(seen.insert(hash), "ticket assigned twice");
                }
                granted += 40;
            }
            Err(LotteryError::InsufficientTickets { .. }) => {
                assert_eq!(pool.count_by_owner(owner).unwrap(), 0);
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert!(granted <= 256);
    assert_eq!(pool.count_assigned().unwrap(), granted);
    assert_eq!(pool.count_unassigned().unwrap(), 256 - granted);

    // Every failed attempt released its claims
    let rest = pool.count_unassigned().unwrap();
    assert_eq!(pool.assign_tickets("celestia1late", rest).unwrap().len() as u64, rest);
}

#[test]
fn test_find_by_suffix() {
    let store = Storage::temporary().unwrap();
    let config = hex2();
    let pool = TicketPool::new(&store, &config);
    pool.reset().unwrap();

    assert_eq!(pool.find_by_suffix("3F").unwrap().unwrap().hash, "3F");
    let partial = pool.find_by_suffix("F").unwrap().unwrap();
    assert!(partial.hash.ends_with('F'));
    assert!(pool.find_by_suffix("ZZ").unwrap().is_none());
}
