//! Collect-and-commit scenarios.
//!
//! Exercises the batcher end to end against a real database:
//! - size-triggered flushing, sequential and concurrent
//! - both triggers interleaving under load
//! - time-dominant flushing with spread-out arrivals
//! - the size-over-timer tie-break
//! - close and drop draining the pending batch

mod common;

use std::time::Duration;

use rand::Rng;
use rowbatch::{BatcherConfig, Error, PresetIdStrategy};

use common::Person;

fn preset_config(max_elements: usize, max_duration: Duration) -> BatcherConfig {
    BatcherConfig {
        max_elements,
        max_duration,
        preset_ids: PresetIdStrategy::TransientTransaction,
    }
}

/// Sequential submissions with `max_elements = 1`: every record is its own
/// batch and keys follow submission order exactly.
#[tokio::test]
async fn sequential_size_trigger_commits_in_order() {
    let (_dir, path) = common::create_temp_db("sequential.db");
    let batcher = spawn(&path, preset_config(1, Duration::from_millis(1)), 2);

    let mut states = Vec::new();
    for n in 0..50 {
        states.push(batcher.collect(Person::numbered(n)).unwrap());
    }
    batcher.close().await;

    for (n, state) in states.iter().enumerate() {
        state.error().await.unwrap();
        assert_eq!(state.id().await.unwrap(), 1 + n as i64);
    }

    let rows = common::read_people(&path);
    assert_eq!(rows.len(), 50);
    for (n, row) in rows.iter().enumerate() {
        assert_eq!(row.id, 1 + n as i64);
        assert_eq!(row.name, format!("Lu_{n}"));
    }
}

/// Concurrent submissions with `max_elements = 1`: keys are a contiguous
/// bijection of 1..=50, though not necessarily in submission order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_size_trigger_assigns_distinct_ids() {
    let (_dir, path) = common::create_temp_db("concurrent.db");
    let batcher = spawn(&path, preset_config(1, Duration::from_millis(1)), 2);

    let mut handles = Vec::new();
    for n in 0..50 {
        let batcher = batcher.clone();
        handles.push(tokio::spawn(async move {
            let gap = rand::thread_rng().gen_range(0..20);
            tokio::time::sleep(Duration::from_millis(gap)).await;
            let person = Person::numbered(n);
            let state = batcher.collect(person.clone()).unwrap();
            (person, state)
        }));
    }

    let mut submitted = Vec::new();
    for handle in handles {
        submitted.push(handle.await.unwrap());
    }
    batcher.close().await;

    common::assert_rows_match_states(&path, &submitted).await;

    let mut ids: Vec<i64> = common::read_people(&path).iter().map(|p| p.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=50).collect::<Vec<i64>>());
}

/// Both triggers at work: 100 concurrent submissions against
/// `max_elements = 33` partition into full and tail batches depending on
/// arrival timing; totals and key assignment must come out exact either way.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_triggers_commit_every_record() {
    let (_dir, path) = common::create_temp_db("mixed.db");
    let batcher = spawn(&path, preset_config(33, Duration::from_millis(1)), 2);

    let mut handles = Vec::new();
    for n in 0..100 {
        let batcher = batcher.clone();
        handles.push(tokio::spawn(async move {
            let person = Person::numbered(n);
            let state = batcher.collect(person.clone()).unwrap();
            (person, state)
        }));
    }

    let mut submitted = Vec::new();
    for handle in handles {
        submitted.push(handle.await.unwrap());
    }
    batcher.close().await;

    common::assert_rows_match_states(&path, &submitted).await;

    let mut ids: Vec<i64> = common::read_people(&path).iter().map(|p| p.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=100).collect::<Vec<i64>>());
}

/// Time-dominant flushing: arrivals spread over ~1s against a 50 ms window
/// and a far-away size bound, so every flush is timer-driven. No record is
/// lost and no partial batch commits twice.
#[tokio::test]
async fn time_dominant_flushes_are_complete() {
    let (_dir, path) = common::create_temp_db("time_dominant.db");
    let batcher = spawn(&path, preset_config(1000, Duration::from_millis(50)), 100);

    let mut submitted = Vec::new();
    for n in 0..200 {
        let gap = rand::thread_rng().gen_range(0..10);
        tokio::time::sleep(Duration::from_millis(gap)).await;
        let person = Person::numbered(n);
        let state = batcher.collect(person.clone()).unwrap();
        submitted.push((person, state));
    }
    batcher.close().await;

    common::assert_rows_match_states(&path, &submitted).await;

    let mut ids: Vec<i64> = common::read_people(&path).iter().map(|p| p.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=200).collect::<Vec<i64>>());
}

/// When the size seal and the timer race, size wins: with an hour-long
/// window, a full batch must still resolve promptly.
#[tokio::test]
async fn tie_break_size_wins() {
    let (_dir, path) = common::create_temp_db("tie_break.db");
    let batcher = spawn(&path, preset_config(3, Duration::from_secs(3600)), 2);

    let states: Vec<_> = (0..3)
        .map(|n| batcher.collect(Person::numbered(n)).unwrap())
        .collect();

    let resolve = async {
        for state in &states {
            state.error().await.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(5), resolve)
        .await
        .expect("full batch should commit without waiting out the timer");

    assert_eq!(common::read_people(&path).len(), 3);
}

/// `close()` seals and commits the pending partial batch before returning,
/// and further submissions are refused.
#[tokio::test]
async fn close_commits_partial_batch() {
    let (_dir, path) = common::create_temp_db("close.db");
    let batcher = spawn(&path, preset_config(100, Duration::from_secs(3600)), 2);

    let states: Vec<_> = (0..2)
        .map(|n| batcher.collect(Person::numbered(n)).unwrap())
        .collect();
    batcher.close().await;

    for state in &states {
        state.error().await.unwrap();
    }
    assert_eq!(common::read_people(&path).len(), 2);

    let err = batcher.collect(Person::numbered(99)).unwrap_err();
    assert!(matches!(err, Error::Closed));
}

/// Dropping the last handle drains the pending batch too; outstanding
/// states stay resolvable.
#[tokio::test]
async fn drop_commits_partial_batch() {
    let (_dir, path) = common::create_temp_db("drop.db");
    let batcher = spawn(&path, preset_config(100, Duration::from_secs(3600)), 2);

    let state = batcher.collect(Person::numbered(0)).unwrap();
    drop(batcher);

    state.error().await.unwrap();
    assert_eq!(state.id().await.unwrap(), 1);
    assert_eq!(common::read_people(&path).len(), 1);
}

fn spawn(
    path: &std::path::Path,
    config: BatcherConfig,
    batch_size: usize,
) -> rowbatch::Batcher<Person> {
    common::spawn_people_batcher(path, config, batch_size)
}
