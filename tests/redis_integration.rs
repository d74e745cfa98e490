//! Integration tests against a real Redis server.
//!
//! Each test uses its own queue name and clears it before and after.
//! Run with: REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_integration -- --ignored

use std::sync::Arc;
use std::time::{Duration, Instant};

use judge_queue::scheduler::{
    BlockingTimeout, Broker, DeliveryMode, JobQueue, LoggingProcessor, QueueEntry, Submission,
    SubmissionProducer, WorkerPool, WorkerPoolConfig,
};

fn redis_url() -> String {
    std::env::var("REDIS_URL").expect("REDIS_URL environment variable must be set for Redis tests")
}

fn unique_queue(prefix: &str) -> String {
    format!("judge_queue_test:{}:{}", prefix, uuid::Uuid::new_v4())
}

async fn open_clean(queue_name: &str) -> JobQueue {
    let queue = JobQueue::connect(&redis_url(), queue_name)
        .await
        .expect("Should connect to Redis");
    queue.clear().await.expect("Should clear queue");
    queue
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_redis_fifo_and_wire_format() {
    let name = unique_queue("fifo");
    let queue = open_clean(&name).await;
    let producer = SubmissionProducer::new(
        JobQueue::connect(&redis_url(), &name)
            .await
            .expect("connect"),
    );

    producer.submit("p1", "print(1)", "python").await.expect("p1");
    producer.submit("p2", "print(2)", "python").await.expect("p2");

    let first = queue
        .dequeue(BlockingTimeout::Infinite)
        .await
        .expect("dequeue")
        .expect("p1 present");
    let second = queue
        .dequeue(Duration::from_secs(1))
        .await
        .expect("dequeue")
        .expect("p2 present");

    let raw: serde_json::Value = serde_json::from_str(first.payload()).expect("json payload");
    assert_eq!(raw["problemId"], "p1");
    assert_eq!(raw["code"], "print(1)");
    assert_eq!(raw["language"], "python");
    assert_eq!(second.decode().expect("decode").problem_id, "p2");

    queue.clear().await.expect("cleanup");
}

#[tokio::test]
#[ignore]
async fn test_redis_accepts_entries_without_timestamp() {
    let name = unique_queue("legacy");
    let queue = open_clean(&name).await;

    queue
        .enqueue(QueueEntry::from_payload(
            r#"{"problemId":"legacy","code":"console.log(1)","language":"javascript"}"#,
        ))
        .await
        .expect("enqueue raw");

    let entry = queue
        .dequeue(Duration::from_secs(1))
        .await
        .expect("dequeue")
        .expect("entry present");
    let decoded = entry.decode().expect("decode");
    assert_eq!(decoded, Submission::new("legacy", "console.log(1)", "javascript"));
    assert!(decoded.enqueued_at.is_none());
}

#[tokio::test]
#[ignore]
async fn test_redis_empty_queue_times_out() {
    let name = unique_queue("timeout");
    let queue = open_clean(&name).await;

    let start = Instant::now();
    let entry = queue
        .dequeue(Duration::from_millis(200))
        .await
        .expect("dequeue");

    assert!(entry.is_none());
    assert!(start.elapsed() >= Duration::from_millis(190));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
#[ignore]
async fn test_redis_lease_lifecycle() {
    let name = unique_queue("lease");
    let leased = DeliveryMode::Leased {
        ttl: Duration::from_millis(200),
    };
    let queue = open_clean(&name).await.with_delivery(leased);

    queue
        .enqueue_submission(&Submission::new("lease-1", "x", "python"))
        .await
        .expect("enqueue");

    let entry = queue
        .dequeue(Duration::from_secs(1))
        .await
        .expect("dequeue")
        .expect("entry present");
    assert!(entry.lease().is_some());
    assert_eq!(queue.len().await.expect("len"), 0);
    assert_eq!(queue.in_flight_len().await.expect("in flight"), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(queue.reclaim_expired().await.expect("reclaim"), 1);
    assert!(!queue.ack(&entry).await.expect("late ack"));

    let again = queue
        .dequeue(Duration::from_secs(1))
        .await
        .expect("dequeue")
        .expect("entry redelivered");
    assert_eq!(again.decode().expect("decode").problem_id, "lease-1");
    assert!(queue.ack(&again).await.expect("ack"));

    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.total(), 0);
}

#[tokio::test]
#[ignore]
async fn test_redis_recovers_unclaimed_entries_to_head() {
    let name = unique_queue("recover");
    let queue = open_clean(&name).await;
    let producer = SubmissionProducer::new(
        JobQueue::connect(&redis_url(), &name)
            .await
            .expect("connect"),
    );
    for id in ["first", "second", "third"] {
        producer.submit(id, "print(1)", "python").await.expect("submit");
    }

    // A worker that died between BRPOPLPUSH and its lease claim.
    let client = redis::Client::open(redis_url()).expect("client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("raw connection");
    let processing = format!("{}:processing", name);
    for _ in 0..2 {
        let moved: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&name)
            .arg(&processing)
            .arg(1)
            .query_async(&mut conn)
            .await
            .expect("brpoplpush");
        assert!(moved.is_some());
    }
    assert_eq!(queue.len().await.expect("len"), 1);
    assert_eq!(queue.in_flight_len().await.expect("in flight"), 2);

    assert_eq!(queue.recover_in_flight().await.expect("recover"), 2);
    assert_eq!(queue.in_flight_len().await.expect("in flight"), 0);
    assert_eq!(queue.recover_in_flight().await.expect("second recover"), 0);

    let mut order = Vec::new();
    while let Some(entry) = queue.dequeue(Duration::ZERO).await.expect("dequeue") {
        order.push(entry.decode().expect("decode").problem_id);
    }
    assert_eq!(order, vec!["first", "second", "third"]);
    queue.clear().await.expect("cleanup");
}

#[tokio::test]
#[ignore]
async fn test_redis_pool_drains_queue() {
    let name = unique_queue("pool");
    let queue = open_clean(&name).await;

    let batch: Vec<Submission> = (0..20)
        .map(|i| Submission::new(format!("job-{}", i), "print(1)", "python"))
        .collect();
    SubmissionProducer::new(JobQueue::connect(&redis_url(), &name).await.expect("connect"))
        .enqueue_batch(batch)
        .await
        .expect("batch");

    let config = WorkerPoolConfig::new(4)
        .with_queue_name(name.clone())
        .with_block_slice(Duration::from_millis(100));
    let mut pool = WorkerPool::new(
        config,
        Broker::redis(redis_url()),
        Arc::new(LoggingProcessor::new(Duration::from_millis(5))),
    );
    pool.start().await.expect("start pool");

    let deadline = Instant::now() + Duration::from_secs(10);
    while pool.stats().jobs_completed < 20 {
        assert!(Instant::now() < deadline, "pool did not drain the queue");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pool.shutdown().await.expect("shutdown");
    assert!(queue.is_empty().await.expect("is_empty"));
}
