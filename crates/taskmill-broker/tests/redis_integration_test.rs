//! Integration tests for RedisBroker
//!
//! Run with: cargo test -p taskmill-broker --test redis_integration_test -- --test-threads=1
//!
//! Requirements:
//! - Redis running with TASKMILL_TEST_REDIS_URL set, or redis://127.0.0.1:6379
//! - The tests use throwaway keys under a per-test prefix and clean up
//!   after themselves

use std::sync::Arc;

use serde_json::Map;

use taskmill_broker::{
    Broker, EnqueueOptions, Producer, RedisBroker, Subscription as _, UpdateSets, WriteOp,
};
use taskmill_core::{Config, TaskRecord, TaskStatus};

/// Get the test broker URL from the environment or use the default.
fn broker_url() -> String {
    std::env::var("TASKMILL_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn connect() -> RedisBroker {
    RedisBroker::connect(&broker_url())
        .await
        .expect("Failed to connect to Redis. Set TASKMILL_TEST_REDIS_URL or ensure redis is running.")
}

/// Remove every key a test may have created under its prefix.
async fn cleanup(broker: &RedisBroker, prefix: &str) {
    let config = Config::default().with_prefix(prefix);
    let keys = config.keyspace();

    for status in TaskStatus::ALL {
        for queue in broker.smembers(&keys.status_set(status)).await.unwrap() {
            let bucket = keys.queue_bucket(status, &queue);
            for (id, _) in broker.zrange_withscores(&bucket).await.unwrap() {
                broker.del(&keys.task(&id)).await.ok();
                broker.del(&keys.executions(&id)).await.ok();
                broker.zrem(&bucket, &id).await.ok();
            }
            broker.srem(&keys.status_set(status), &queue).await.ok();
        }
    }
}

#[tokio::test]
async fn test_string_set_get_del() {
    let broker = connect().await;

    broker.set("itest:str:key", "value").await.unwrap();
    assert_eq!(
        broker.get("itest:str:key").await.unwrap(),
        Some("value".to_string())
    );

    broker.del("itest:str:key").await.unwrap();
    assert_eq!(broker.get("itest:str:key").await.unwrap(), None);
}

#[tokio::test]
async fn test_zpoppush_script_round_trip() {
    let broker = connect().await;
    let src = "itest:zpp:src";
    let dst = "itest:zpp:dst";
    let src_set = "itest:zpp:queued";
    let dst_set = "itest:zpp:active";

    broker.del(src).await.unwrap();
    broker.del(dst).await.unwrap();
    broker.del(src_set).await.unwrap();
    broker.del(dst_set).await.unwrap();

    broker.sadd(src_set, "q").await.unwrap();
    broker.zadd(src, "a", 1.0).await.unwrap();
    broker.zadd(src, "b", 2.0).await.unwrap();

    let update = UpdateSets {
        src_set: src_set.to_string(),
        dst_set: dst_set.to_string(),
        queue: "q".to_string(),
    };

    let moved = broker
        .zpoppush(src, dst, 1, None, 10.0, Some(&update))
        .await
        .unwrap();
    assert_eq!(moved, vec!["a"]);
    // Source still has "b": queue stays in the source status set.
    assert_eq!(broker.smembers(src_set).await.unwrap(), vec!["q"]);
    assert_eq!(broker.smembers(dst_set).await.unwrap(), vec!["q"]);

    let moved = broker
        .zpoppush(src, dst, 1, None, 11.0, Some(&update))
        .await
        .unwrap();
    assert_eq!(moved, vec!["b"]);
    // Source drained: queue leaves the source status set.
    assert!(broker.smembers(src_set).await.unwrap().is_empty());
    assert_eq!(broker.zscore(dst, "b").await.unwrap(), Some(11.0));

    broker.del(dst).await.unwrap();
    broker.del(dst_set).await.unwrap();
}

#[tokio::test]
async fn test_zpoppush_script_respects_max_score() {
    let broker = connect().await;
    let src = "itest:zppmax:src";
    let dst = "itest:zppmax:dst";

    broker.del(src).await.unwrap();
    broker.del(dst).await.unwrap();

    broker.zadd(src, "stale", 5.0).await.unwrap();
    broker.zadd(src, "fresh", 500.0).await.unwrap();

    let moved = broker
        .zpoppush(src, dst, 10, Some(100.0), 600.0, None)
        .await
        .unwrap();
    assert_eq!(moved, vec!["stale"]);
    assert_eq!(broker.zscore(src, "fresh").await.unwrap(), Some(500.0));

    broker.del(src).await.unwrap();
    broker.del(dst).await.unwrap();
}

#[tokio::test]
async fn test_srem_if_not_exists_script() {
    let broker = connect().await;
    let set_key = "itest:sine:set";
    let zset_key = "itest:sine:zset";

    broker.del(set_key).await.unwrap();
    broker.del(zset_key).await.unwrap();
    broker.sadd(set_key, "q").await.unwrap();

    broker.zadd(zset_key, "id", 1.0).await.unwrap();
    assert!(!broker
        .srem_if_not_exists(set_key, "q", zset_key)
        .await
        .unwrap());

    broker.zrem(zset_key, "id").await.unwrap();
    assert!(broker
        .srem_if_not_exists(set_key, "q", zset_key)
        .await
        .unwrap());
    assert!(broker.smembers(set_key).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_if_not_in_zsets_script() {
    let broker = connect().await;
    let record_key = "itest:dinz:record";
    let zsets = vec!["itest:dinz:z1".to_string(), "itest:dinz:z2".to_string()];

    broker.set(record_key, "{}").await.unwrap();
    broker.del(&zsets[0]).await.unwrap();
    broker.del(&zsets[1]).await.unwrap();

    broker.zadd(&zsets[1], "id", 1.0).await.unwrap();
    assert!(!broker
        .delete_if_not_in_zsets(record_key, "id", &zsets)
        .await
        .unwrap());
    assert!(broker.get(record_key).await.unwrap().is_some());

    broker.zrem(&zsets[1], "id").await.unwrap();
    assert!(broker
        .delete_if_not_in_zsets(record_key, "id", &zsets)
        .await
        .unwrap());
    assert!(broker.get(record_key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pipelined_batch() {
    let broker = connect().await;

    broker
        .pipelined(&[
            WriteOp::Set {
                key: "itest:pipe:k".to_string(),
                value: "v".to_string(),
            },
            WriteOp::ZAdd {
                key: "itest:pipe:z".to_string(),
                member: "id".to_string(),
                score: 1.5,
            },
        ])
        .await
        .unwrap();

    assert_eq!(
        broker.get("itest:pipe:k").await.unwrap(),
        Some("v".to_string())
    );
    assert_eq!(
        broker.zscore("itest:pipe:z", "id").await.unwrap(),
        Some(1.5)
    );

    broker.del("itest:pipe:k").await.unwrap();
    broker.del("itest:pipe:z").await.unwrap();
}

#[tokio::test]
async fn test_pub_sub_wakeup() {
    let broker = connect().await;
    let mut sub = broker.subscribe("itest:activity").await.unwrap();

    // Nothing published yet.
    assert_eq!(sub.try_message().await.unwrap(), None);

    broker.publish("itest:activity", "default").await.unwrap();
    assert_eq!(sub.next_message().await.unwrap(), "default");
}

#[tokio::test]
async fn test_enqueue_against_redis() {
    let broker = Arc::new(connect().await);
    let config = Config::default().with_prefix("itest-enq");
    let keys = config.keyspace();
    cleanup(&broker, "itest-enq").await;

    let producer = Producer::new(broker.clone() as Arc<dyn Broker>, config);
    let task_id = producer
        .enqueue("pkg.mod.noop", vec![], Map::new(), EnqueueOptions::new())
        .await
        .unwrap();

    let raw = broker.get(&keys.task(&task_id)).await.unwrap().unwrap();
    let record = TaskRecord::decode(&raw).unwrap();
    assert_eq!(record.id, task_id);

    let bucket = keys.queue_bucket(TaskStatus::Queued, "default");
    assert!(broker.zscore(&bucket, &task_id).await.unwrap().is_some());

    cleanup(&broker, "itest-enq").await;
}
