mod common;

use std::sync::Arc;
use std::time::Duration;

use kolbot::quota::QuotaGate;
use kolbot::store::Kv;
use uuid::Uuid;

fn gate(kv: Arc<dyn kolbot::store::Kv>) -> QuotaGate {
    QuotaGate::new(kv, common::test_keyspace(), Duration::from_secs(86_400))
}

#[tokio::test]
async fn test_increments_up_to_limit_then_denies() {
    let kv = common::test_kv();
    let gate = gate(kv.clone());
    let sub_id = Uuid::new_v4();

    let first = gate.increment_and_validate("U", "T", 2, sub_id).await;
    assert!(first.success);
    assert_eq!(first.new_count, 1);

    let second = gate.increment_and_validate("U", "T", 2, sub_id).await;
    assert!(second.success);
    assert_eq!(second.new_count, 2);

    let third = gate.increment_and_validate("U", "T", 2, sub_id).await;
    assert!(!third.success);
    assert!(third.was_at_limit);
    assert_eq!(third.new_count, 2, "rollback must restore the counter");

    // The rollback leaves the stored counter at the limit, not above it.
    let key = common::test_keyspace().token_buy_count("U", "T");
    assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("2"));
}

#[tokio::test]
async fn test_counter_never_exceeds_limit_under_contention() {
    let kv = common::test_kv();
    let gate = Arc::new(gate(kv.clone()));
    let sub_id = Uuid::new_v4();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let gate = Arc::clone(&gate);
        tasks.push(tokio::spawn(async move {
            gate.increment_and_validate("U", "T", 2, sub_id).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().success {
            successes += 1;
        }
    }
    assert_eq!(successes, 2, "exactly max_count callers may win");

    let key = common::test_keyspace().token_buy_count("U", "T");
    let final_count: i64 = kv.get(&key).await.unwrap().unwrap().parse().unwrap();
    assert!(final_count <= 2, "counter must never settle above the limit");
    assert!(final_count >= 1);
}

#[tokio::test]
async fn test_can_purchase_is_advisory_and_reads_only() {
    let kv = common::test_kv();
    let gate = gate(kv.clone());

    let fresh = gate.can_purchase("U", "T", 3).await;
    assert!(fresh.can_purchase);
    assert_eq!(fresh.current, 0);
    assert_eq!(fresh.remaining, 3);

    // The pre-check must not create the counter.
    let key = common::test_keyspace().token_buy_count("U", "T");
    assert_eq!(kv.get(&key).await.unwrap(), None);

    for _ in 0..3 {
        gate.increment_and_validate("U", "T", 3, Uuid::new_v4()).await;
    }
    let exhausted = gate.can_purchase("U", "T", 3).await;
    assert!(!exhausted.can_purchase);
    assert_eq!(exhausted.current, 3);
    assert_eq!(exhausted.remaining, 0);
}

#[tokio::test]
async fn test_fails_open_on_read_and_closed_on_write() {
    let gate = gate(Arc::new(common::FailingKv));

    let check = gate.can_purchase("U", "T", 1).await;
    assert!(check.can_purchase, "store outage must not block trading");
    assert_eq!(check.current, 0);

    let increment = gate.increment_and_validate("U", "T", 1, Uuid::new_v4()).await;
    assert!(!increment.success, "the authoritative gate fails closed");
    assert!(!increment.was_at_limit);
}

#[tokio::test]
async fn test_record_written_on_success() {
    let kv = common::test_kv();
    let gate = gate(kv);
    let sub_id = Uuid::new_v4();

    gate.increment_and_validate("U", "T", 5, sub_id).await;
    gate.increment_and_validate("U", "T", 5, sub_id).await;

    let record = gate.get_record("U", "T").await.expect("record must exist");
    assert_eq!(record.current_count, 2);
    assert_eq!(record.max_count, 5);
    assert_eq!(record.subscription_id, sub_id);
    assert_eq!(record.user_id, "U");
    assert_eq!(record.token_mint, "T");
}

#[tokio::test]
async fn test_reset_deletes_counter_and_record() {
    let kv = common::test_kv();
    let gate = gate(kv.clone());

    gate.increment_and_validate("U", "T", 5, Uuid::new_v4()).await;
    assert!(gate.get_record("U", "T").await.is_some());

    assert!(gate.reset("U", "T").await);
    assert!(gate.get_record("U", "T").await.is_none());

    let key = common::test_keyspace().token_buy_count("U", "T");
    assert_eq!(kv.get(&key).await.unwrap(), None);

    // Nothing left to delete.
    assert!(!gate.reset("U", "T").await);

    // A fresh window starts from zero.
    let restarted = gate.increment_and_validate("U", "T", 5, Uuid::new_v4()).await;
    assert_eq!(restarted.new_count, 1);
}
