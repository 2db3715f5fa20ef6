// crates/alert-core/tests/alert_scenarios.rs
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use alert_core::{
    AlertCondition, AlertId, AlertStore, ConditionState, InMemoryRepository, MatchingEngine,
    Notify, Trigger, SCHEDULE_FORMAT,
};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
struct Sent {
    account: String,
    instrument: String,
    price: f64,
    reason: String,
}

#[derive(Default, Clone)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Sent>>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notify for RecordingNotifier {
    async fn notify(&self, account: &str, instrument: &str, price: f64, reason: &str) {
        self.sent.lock().push(Sent {
            account: account.to_string(),
            instrument: instrument.to_string(),
            price,
            reason: reason.to_string(),
        });
    }
}

struct Harness {
    repo: Arc<InMemoryRepository>,
    store: Arc<AlertStore>,
    engine: MatchingEngine<RecordingNotifier>,
    notifier: RecordingNotifier,
}

async fn harness(conditions: Vec<AlertCondition>) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    for c in conditions {
        repo.upsert(c);
    }
    let store = Arc::new(AlertStore::new(repo.clone()));
    store.reload().await.expect("initial reload");

    let notifier = RecordingNotifier::default();
    let engine = MatchingEngine::new(store.clone(), repo.clone(), notifier.clone());
    Harness {
        repo,
        store,
        engine,
        notifier,
    }
}

fn noon() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2025-11-20 12:00:00", SCHEDULE_FORMAT).unwrap()
}

fn ids_of(conditions: &[AlertCondition]) -> HashSet<AlertId> {
    conditions.iter().map(|c| c.id).collect()
}

#[tokio::test]
async fn ceiling_scenario_fires_once() {
    let h = harness(vec![AlertCondition::new(1, "alice", "IF2512")
        .with_ceiling(4500.0)
        .with_floor(0.0)])
    .await;

    assert!(h.engine.evaluate_at("IF2512", 4499.0, noon()).await.is_empty());
    assert!(h.notifier.sent().is_empty());

    let fired = h.engine.evaluate_at("IF2512", 4500.0, noon()).await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].trigger, Trigger::Ceiling(4500.0));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].account, "alice");
    assert_eq!(sent[0].instrument, "IF2512");
    assert_eq!(sent[0].price, 4500.0);
    assert!(sent[0].reason.contains("4500"), "reason: {}", sent[0].reason);

    assert!(h.engine.evaluate_at("IF2512", 4600.0, noon()).await.is_empty());
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.repo.state_of(AlertId(1)), Some(ConditionState::Triggered));
}

#[tokio::test]
async fn burst_above_ceiling_notifies_exactly_once() {
    let h = harness(vec![AlertCondition::new(1, "alice", "IF2512").with_ceiling(100.0)]).await;

    for i in 0..50 {
        h.engine.evaluate_at("IF2512", 100.0 + i as f64, noon()).await;
    }
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn floor_fires_with_floor_reason() {
    let h = harness(vec![AlertCondition::new(2, "bob", "T2603").with_floor(102.5)]).await;

    assert!(h.engine.evaluate_at("T2603", 102.6, noon()).await.is_empty());
    let fired = h.engine.evaluate_at("T2603", 102.5, noon()).await;
    assert_eq!(fired[0].trigger, Trigger::Floor(102.5));
    assert!(h.notifier.sent()[0].reason.contains("floor"));
}

#[tokio::test]
async fn inactive_condition_never_fires() {
    let h = harness(vec![AlertCondition::new(3, "carol", "IC2512")
        .with_ceiling(0.0)
        .with_floor(-1.0)])
    .await;

    for price in [0.0, 0.01, 5000.0, 1e12] {
        assert!(h.engine.evaluate_at("IC2512", price, noon()).await.is_empty());
    }
    assert_eq!(h.store.lookup("IC2512").len(), 1);
}

#[tokio::test]
async fn schedule_in_future_never_fires_and_past_fires_regardless_of_price() {
    let h = harness(vec![
        AlertCondition::new(4, "dave", "IM2512").with_schedule("2099-01-01 00:00:00"),
        AlertCondition::new(5, "erin", "IM2512").with_schedule("2000-01-01 00:00:00"),
    ])
    .await;

    let fired = h.engine.evaluate("IM2512", 1.0).await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].id, AlertId(5));
    assert_eq!(
        fired[0].trigger,
        Trigger::Scheduled("2000-01-01 00:00:00".to_string())
    );

    assert!(h.engine.evaluate("IM2512", 99999.0).await.is_empty());
    assert_eq!(ids_of(&h.store.lookup("IM2512")), HashSet::from([AlertId(4)]));
}

#[tokio::test]
async fn malformed_schedule_keeps_price_predicates() {
    let h = harness(vec![AlertCondition::new(6, "frank", "IH2512")
        .with_ceiling(2800.0)
        .with_schedule("not-a-date")])
    .await;

    assert!(h.engine.evaluate_at("IH2512", 2000.0, noon()).await.is_empty());
    assert_eq!(h.engine.evaluate_at("IH2512", 2800.0, noon()).await.len(), 1);
}

#[tokio::test]
async fn fired_condition_leaves_index_but_siblings_stay() {
    let h = harness(vec![
        AlertCondition::new(1, "alice", "IF2512").with_ceiling(4500.0),
        AlertCondition::new(2, "bob", "IF2512").with_ceiling(4700.0),
        AlertCondition::new(3, "bob", "IH2512").with_ceiling(1.0),
    ])
    .await;

    h.engine.evaluate_at("IF2512", 4600.0, noon()).await;

    assert_eq!(ids_of(&h.store.lookup("IF2512")), HashSet::from([AlertId(2)]));
    assert_eq!(h.store.lookup("IH2512").len(), 1);
}

#[tokio::test]
async fn unknown_instrument_is_empty() {
    let h = harness(vec![AlertCondition::new(1, "alice", "IF2512").with_ceiling(1.0)]).await;

    assert!(h.store.lookup("XX9999").is_empty());
    assert!(h.engine.evaluate_at("XX9999", 10.0, noon()).await.is_empty());
}

#[tokio::test]
async fn failed_reload_keeps_previous_index() {
    let h = harness(vec![AlertCondition::new(1, "alice", "IF2512").with_ceiling(4500.0)]).await;

    h.repo.fail_queries(true);
    h.repo.upsert(AlertCondition::new(2, "bob", "IF2512").with_ceiling(10.0));
    assert!(h.store.reload().await.is_err());
    assert_eq!(ids_of(&h.store.lookup("IF2512")), HashSet::from([AlertId(1)]));

    h.repo.fail_queries(false);
    assert_eq!(h.store.reload().await.unwrap(), 2);
    assert_eq!(h.store.lookup("IF2512").len(), 2);
}

#[tokio::test]
async fn reload_picks_up_new_and_withdrawn_alerts() {
    let h = harness(vec![AlertCondition::new(1, "alice", "IF2512").with_ceiling(4500.0)]).await;

    h.repo.delete(AlertId(1));
    h.repo.upsert(AlertCondition::new(7, "gina", "TS2603").with_floor(99.0));
    h.store.reload().await.unwrap();

    assert!(h.store.lookup("IF2512").is_empty());
    assert_eq!(h.store.instruments(), vec!["TS2603".to_string()]);
}

#[tokio::test]
async fn failed_persist_still_notifies_and_does_not_refire_after_reload() {
    let h = harness(vec![AlertCondition::new(1, "alice", "IF2512").with_ceiling(4500.0)]).await;
    h.repo.fail_updates(true);

    assert_eq!(h.engine.evaluate_at("IF2512", 4550.0, noon()).await.len(), 1);
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.repo.state_of(AlertId(1)), Some(ConditionState::Pending));

    // The store still reports it pending; the index must not bring it back.
    h.store.reload().await.unwrap();
    assert!(h.store.lookup("IF2512").is_empty());
    assert!(h.engine.evaluate_at("IF2512", 4600.0, noon()).await.is_empty());
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn re_armed_alert_is_loaded_again_once_store_caught_up() {
    let h = harness(vec![AlertCondition::new(1, "alice", "IF2512").with_ceiling(4500.0)]).await;

    h.engine.evaluate_at("IF2512", 4500.0, noon()).await;
    // Store now says Triggered: the guard entry is released.
    h.store.reload().await.unwrap();
    assert!(h.store.is_empty());

    // The user re-arms the same alert.
    h.repo.upsert(AlertCondition::new(1, "alice", "IF2512").with_ceiling(4800.0));
    h.store.reload().await.unwrap();
    assert_eq!(h.store.lookup("IF2512").len(), 1);

    h.engine.evaluate_at("IF2512", 4800.0, noon()).await;
    assert_eq!(h.notifier.sent().len(), 2);
}

#[tokio::test]
async fn invalid_records_are_skipped_on_reload() {
    let h = harness(vec![
        AlertCondition::new(1, "alice", ""),
        AlertCondition::new(2, "", "IF2512"),
        AlertCondition::new(3, "carol", "IF2512").with_ceiling(1.0),
    ])
    .await;

    assert_eq!(h.store.len(), 1);
    assert_eq!(h.store.lookup("IF2512")[0].id, AlertId(3));
}

/// Lookups the reader must have made while the writer was active.
const MIN_CONCURRENT_LOOKUPS: usize = 2_000;

#[test]
fn lookup_during_reload_sees_whole_index() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let generation_a: Vec<AlertCondition> = (1..=3)
        .map(|i| AlertCondition::new(i, "a", "IF2512").with_ceiling(1e9))
        .collect();
    let generation_b: Vec<AlertCondition> = (10..=14)
        .map(|i| AlertCondition::new(i, "b", "IF2512").with_ceiling(1e9))
        .collect();
    let set_a = ids_of(&generation_a);
    let set_b = ids_of(&generation_b);

    let repo = Arc::new(InMemoryRepository::new());
    for c in generation_a.iter().cloned() {
        repo.upsert(c);
    }
    let store = Arc::new(AlertStore::new(repo.clone()));
    rt.block_on(store.reload()).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicUsize::new(0));
    let ready = Arc::new(Barrier::new(2));
    let reader = {
        let store = store.clone();
        let (stop, observed, ready) = (stop.clone(), observed.clone(), ready.clone());
        let (set_a, set_b) = (set_a.clone(), set_b.clone());
        std::thread::spawn(move || {
            ready.wait();
            while !stop.load(Ordering::Relaxed) {
                let seen = ids_of(&store.lookup("IF2512"));
                assert!(seen == set_a || seen == set_b, "partial index observed: {:?}", seen);
                observed.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    ready.wait();
    let mut rounds = 0usize;
    rt.block_on(async {
        while rounds < 50 || observed.load(Ordering::Relaxed) < MIN_CONCURRENT_LOOKUPS {
            let (outgoing, incoming) = if rounds % 2 == 0 {
                (&generation_a, &generation_b)
            } else {
                (&generation_b, &generation_a)
            };
            for c in outgoing {
                repo.delete(c.id);
            }
            for c in incoming {
                repo.upsert(c.clone());
            }
            store.reload().await.unwrap();
            rounds += 1;
            assert!(!reader.is_finished(), "reader thread died");
        }
    });

    stop.store(true, Ordering::Relaxed);
    reader.join().expect("reader thread panicked");
    assert!(observed.load(Ordering::Relaxed) >= MIN_CONCURRENT_LOOKUPS);
}

#[test]
fn lookup_during_remove_only_sees_shrinking_buckets() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let conditions: Vec<AlertCondition> = (1..=200)
        .map(|i| AlertCondition::new(i, "a", "IF2512").with_ceiling(1e9))
        .collect();
    let all = ids_of(&conditions);

    let repo = Arc::new(InMemoryRepository::new());
    for c in conditions.iter().cloned() {
        repo.upsert(c);
    }
    let store = Arc::new(AlertStore::new(repo));
    rt.block_on(store.reload()).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicUsize::new(0));
    let ready = Arc::new(Barrier::new(2));
    let reader = {
        let store = store.clone();
        let (stop, observed, ready) = (stop.clone(), observed.clone(), ready.clone());
        std::thread::spawn(move || {
            ready.wait();
            let mut previous = all;
            while !stop.load(Ordering::Relaxed) {
                let seen = ids_of(&store.lookup("IF2512"));
                assert!(seen.is_subset(&previous), "removed alert came back");
                previous = seen;
                observed.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    ready.wait();
    for c in &conditions {
        let target = observed.load(Ordering::Relaxed) + 5;
        assert_eq!(store.remove("IF2512", &HashSet::from([c.id])), 1);
        while observed.load(Ordering::Relaxed) < target && !reader.is_finished() {
            std::thread::yield_now();
        }
    }

    stop.store(true, Ordering::Relaxed);
    reader.join().expect("reader thread panicked");
    assert!(store.lookup("IF2512").is_empty());
    assert!(observed.load(Ordering::Relaxed) >= conditions.len() * 5);
}
