//! Integration tests for RedisJobStore.
//!
//! These tests run against a real Redis server using testcontainers.
//! Requires Docker: `cargo test -p herald-jobs -- --ignored`.

use chrono::{Duration as ChronoDuration, Utc};
use herald_jobs::{
    create_pool, Job, JobError, JobState, JobStore, PostPayload, RedisConfig, RedisJobStore,
};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::{Redis, REDIS_PORT};

const LEASE: Duration = Duration::from_secs(30);

/// Redis container wrapper.
struct TestRedis {
    _container: ContainerAsync<Redis>,
    store: Arc<RedisJobStore>,
}

impl TestRedis {
    async fn new() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(REDIS_PORT)
            .await
            .expect("Failed to get Redis port");

        let config = RedisConfig {
            url: format!("redis://127.0.0.1:{}", port),
            pool_size: 8,
            key_prefix: "herald:test".to_string(),
        };

        let pool = create_pool(&config).await.expect("Failed to create pool");

        Self {
            _container: container,
            store: Arc::new(RedisJobStore::new(pool, &config)),
        }
    }
}

fn due_job() -> Job {
    let now = Utc::now();
    Job::new(
        PostPayload::text("hello").with_target("page-1"),
        now - ChronoDuration::seconds(1),
        3,
        now,
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_get_and_duplicate() {
    let redis = TestRedis::new().await;
    let job = due_job();

    let id = redis.store.create(job.clone()).await.unwrap();
    assert_eq!(redis.store.get(&id).await.unwrap(), job);
    assert!(matches!(
        redis.store.create(job).await,
        Err(JobError::AlreadyExists(_))
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_list_due_and_lease_lifecycle() {
    let redis = TestRedis::new().await;
    let store = &redis.store;
    let now = Utc::now();

    let due = due_job();
    let future = Job::new(PostPayload::text("later"), now + ChronoDuration::hours(1), 3, now);
    store.create(due.clone()).await.unwrap();
    store.create(future.clone()).await.unwrap();

    let listed = store.list_due(now, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, due.id);

    assert!(store.try_lease(&due.id, "w1", now, LEASE).await.unwrap());
    assert!(!store.try_lease(&due.id, "w2", now, LEASE).await.unwrap());
    assert!(store.list_due(now, 10).await.unwrap().is_empty());

    assert!(store.renew_lease(&due.id, "w1", now, LEASE).await.unwrap());
    assert!(!store.renew_lease(&due.id, "w2", now, LEASE).await.unwrap());

    let done = store
        .update(&due.id, &|job: &mut Job| job.complete("w1", now))
        .await
        .unwrap();
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.attempts, 1);

    let completed = store.list_by_states(&[JobState::Completed]).await.unwrap();
    assert_eq!(completed.len(), 1);
    let waiting = store.list_by_states(&[JobState::Waiting]).await.unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].id, future.id);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_lease_is_exclusive() {
    let redis = TestRedis::new().await;
    let job = due_job();
    let id = redis.store.create(job).await.unwrap();
    let now = Utc::now();

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = redis.store.clone();
        handles.push(tokio::spawn(async move {
            store
                .try_lease(&id, &format!("w{}", i), now, LEASE)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_rejected_mutation_leaves_record() {
    let redis = TestRedis::new().await;
    let job = due_job();
    let id = redis.store.create(job).await.unwrap();
    let now = Utc::now();
    redis.store.try_lease(&id, "w1", now, LEASE).await.unwrap();

    let result = redis
        .store
        .update(&id, &|job: &mut Job| job.cancel(now))
        .await;
    assert!(matches!(result, Err(JobError::CannotCancelActive(_))));
    assert_eq!(redis.store.get(&id).await.unwrap().state, JobState::Active);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_delete_clears_indexes() {
    let redis = TestRedis::new().await;
    let job = due_job();
    let id = redis.store.create(job).await.unwrap();

    assert!(redis.store.delete(&id).await.unwrap());
    assert!(!redis.store.delete(&id).await.unwrap());
    assert!(redis.store.list_due(Utc::now(), 10).await.unwrap().is_empty());
    assert!(redis
        .store
        .list_by_states(&JobState::ALL)
        .await
        .unwrap()
        .is_empty());
    assert!(redis.store.health_check().await.is_ok());
}
