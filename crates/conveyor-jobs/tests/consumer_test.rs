//! Integration tests for JobConsumer.
//!
//! These tests run against an in-memory broker; no Redis is required.

mod common;

use common::{Harness, HarnessOptions};
use conveyor_jobs::{
    ConsumerManager, JobError, JobId, JobStatus, Lease, LockService, PollToken, QueueName,
    UpdateRequest, DEFAULT_FAILURE_REASON,
};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_poll_returns_job_locked_with_token() {
    let h = Harness::new();
    h.broker
        .push(QueueName::Webhook, "J1", json!({ "url": "https://example.com/hook" }));

    let token = PollToken::from("T1");
    let job = h
        .consumer
        .poll(QueueName::Webhook, &token)
        .await
        .expect("poll failed")
        .expect("job expected");

    assert_eq!(job.id, JobId::from("J1"));
    assert_eq!(job.data, json!({ "url": "https://example.com/hook" }));
    assert_eq!(h.broker.lock_of("J1"), Some(token));

    let again = h
        .consumer
        .poll(QueueName::Webhook, &PollToken::from("T2"))
        .await
        .unwrap();
    assert!(again.is_none());
    assert_eq!(h.connector.connects(QueueName::Webhook), 1);
}

#[tokio::test]
async fn test_poll_empty_queue_returns_none() {
    let h = Harness::new();

    let polled = h
        .consumer
        .poll(QueueName::Scheduled, &PollToken::generate())
        .await
        .unwrap();

    assert!(polled.is_none());
    assert!(h.sink.codes().is_empty());
}

#[tokio::test]
async fn test_completed_update_finishes_job() {
    let h = Harness::new();
    h.broker.push(QueueName::Webhook, "J1", json!({}));
    let token = PollToken::from("T1");
    h.consumer.poll(QueueName::Webhook, &token).await.unwrap();

    h.consumer
        .update(UpdateRequest::completed(QueueName::Webhook, "J1", token))
        .await
        .unwrap();

    let job = h.broker.job("J1").unwrap();
    assert!(job.is_finished());
    assert!(job.failed_reason.is_none());
    assert!(h.broker.lock_of("J1").is_none());
}

#[tokio::test]
async fn test_failed_update_records_reason() {
    let h = Harness::new();
    h.broker.push(QueueName::Webhook, "J1", json!({ "url": "https://example.com/hook" }));
    let token = PollToken::from("T1");
    h.consumer.poll(QueueName::Webhook, &token).await.unwrap();

    h.consumer
        .update(UpdateRequest::failed(QueueName::Webhook, "J1", token, "timeout"))
        .await
        .unwrap();

    let job = h.broker.job("J1").unwrap();
    assert_eq!(job.failed_reason.as_deref(), Some("timeout"));
    assert_eq!(job.attempts_made, 1);

    let events = h.broker.events();
    assert!(events.contains(&"fail:J1:timeout".to_string()));
    assert_eq!(events.iter().filter(|e| *e == "ratelimit:J1").count(), 1);
}

#[tokio::test]
async fn test_failed_update_without_message_uses_default_reason() {
    let h = Harness::new();
    h.broker.push(QueueName::OneTime, "J8", json!({}));
    let token = PollToken::from("T8");
    h.consumer.poll(QueueName::OneTime, &token).await.unwrap();

    h.consumer
        .update(UpdateRequest {
            queue: QueueName::OneTime,
            job_id: JobId::from("J8"),
            status: JobStatus::Failed,
            message: None,
            token: Some(token),
        })
        .await
        .unwrap();

    assert_eq!(
        h.broker.job("J8").unwrap().failed_reason.as_deref(),
        Some(DEFAULT_FAILURE_REASON)
    );
}

#[tokio::test]
async fn test_concurrent_polls_are_serialized() {
    let h = Harness::with(HarnessOptions {
        fetch_delay: Duration::from_millis(15),
        ..Default::default()
    });
    for id in ["J1", "J2", "J3"] {
        h.broker.push(QueueName::Webhook, id, json!({}));
    }

    let tokens: Vec<PollToken> = (0..8).map(|_| PollToken::generate()).collect();
    let results = join_all(
        tokens
            .iter()
            .map(|token| h.consumer.poll(QueueName::Webhook, token)),
    )
    .await;

    assert_eq!(h.broker.max_in_flight_fetches(), 1);

    let mut ids: Vec<String> = results
        .into_iter()
        .filter_map(|r| r.unwrap())
        .map(|job| job.id.to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["J1", "J2", "J3"]);
}

#[tokio::test]
async fn test_concurrent_first_use_connects_once() {
    let h = Harness::new();

    let workers = join_all((0..10).map(|_| h.consumer.registry().ensure_worker(QueueName::OneTime))).await;

    let first = workers[0].as_ref().unwrap().clone();
    for worker in &workers {
        assert!(Arc::ptr_eq(&first, worker.as_ref().unwrap()));
    }
    assert_eq!(h.connector.connects(QueueName::OneTime), 1);
    assert_eq!(h.consumer.registry().total_creations(), 1);
}

#[tokio::test]
async fn test_lock_timeout_returns_none_without_creating_worker() {
    let h = Harness::with(HarnessOptions {
        poll_lock_wait: Some(Duration::from_millis(30)),
        ..Default::default()
    });
    h.broker.push(QueueName::Webhook, "J1", json!({}));

    let held = h
        .locks
        .acquire(&QueueName::Webhook.poll_lock_key(), Duration::from_millis(10))
        .await
        .unwrap();

    let polled = h
        .consumer
        .poll(QueueName::Webhook, &PollToken::generate())
        .await
        .unwrap();

    assert!(polled.is_none());
    assert!(h.consumer.registry().is_empty());
    assert_eq!(h.connector.total_connects(), 0);
    assert!(h.sink.codes().is_empty());

    held.release().await.unwrap();
}

#[tokio::test]
async fn test_lock_backend_failure_is_reported() {
    let h = Harness::with(HarnessOptions {
        broken_locks: true,
        ..Default::default()
    });

    let result = h
        .consumer
        .poll(QueueName::Webhook, &PollToken::generate())
        .await;

    assert!(matches!(result, Err(JobError::Lock(_))));
    assert_eq!(h.sink.codes(), vec!["lock"]);
}

#[tokio::test]
async fn test_update_unknown_job_is_noop() {
    let h = Harness::new();

    h.consumer
        .update(UpdateRequest::completed(
            QueueName::Webhook,
            "missing",
            PollToken::from("T1"),
        ))
        .await
        .unwrap();

    assert!(h.broker.events().is_empty());
    assert!(h.sink.codes().is_empty());
}

#[tokio::test]
async fn test_update_finished_job_is_noop() {
    let h = Harness::new();
    h.broker.push(QueueName::Webhook, "J1", json!({}));
    let token = PollToken::from("T1");
    h.consumer.poll(QueueName::Webhook, &token).await.unwrap();
    h.consumer
        .update(UpdateRequest::completed(QueueName::Webhook, "J1", token.clone()))
        .await
        .unwrap();

    h.consumer
        .update(UpdateRequest::failed(QueueName::Webhook, "J1", token, "late"))
        .await
        .unwrap();

    assert_eq!(h.broker.events(), vec!["ratelimit:J1", "complete:J1"]);
    assert!(h.broker.job("J1").unwrap().failed_reason.is_none());
}

#[tokio::test]
async fn test_rate_limiter_notified_before_transition() {
    let h = Harness::new();
    h.broker.push(QueueName::OneTime, "J1", json!({ "projectId": "p1" }));
    let token = PollToken::from("T1");
    h.consumer.poll(QueueName::OneTime, &token).await.unwrap();

    h.consumer
        .update(UpdateRequest::failed(QueueName::OneTime, "J1", token, "timeout"))
        .await
        .unwrap();

    assert_eq!(h.broker.events(), vec!["ratelimit:J1", "fail:J1:timeout"]);
}

#[tokio::test]
async fn test_rate_limiter_rejection_is_reported_and_transition_applies() {
    let h = Harness::with(HarnessOptions {
        reject_rate_limit: true,
        ..Default::default()
    });
    h.broker.push(QueueName::OneTime, "J1", json!({ "projectId": "p1" }));
    let token = PollToken::from("T1");
    h.consumer.poll(QueueName::OneTime, &token).await.unwrap();

    let result = h
        .consumer
        .update(UpdateRequest::completed(QueueName::OneTime, "J1", token))
        .await;

    assert!(result.is_ok());
    assert!(h.broker.job("J1").unwrap().is_finished());
    assert_eq!(h.sink.wait_for(1).await, vec!["rate_limiter"]);
}

#[tokio::test]
async fn test_update_without_token_fails_immediately() {
    let h = Harness::new();
    h.broker.push(QueueName::Webhook, "J1", json!({}));

    let result = h
        .consumer
        .update(UpdateRequest {
            queue: QueueName::Webhook,
            job_id: JobId::from("J1"),
            status: JobStatus::Completed,
            message: None,
            token: None,
        })
        .await;

    match result {
        Err(JobError::MissingToken { job_id }) => assert_eq!(job_id, "J1"),
        other => panic!("expected missing token, got {:?}", other),
    }
    assert!(h.consumer.registry().is_empty());
    assert!(h.sink.codes().is_empty());
}

#[tokio::test]
async fn test_update_with_foreign_token_is_reported() {
    let h = Harness::new();
    h.broker.push(QueueName::Webhook, "J1", json!({}));
    h.consumer
        .poll(QueueName::Webhook, &PollToken::from("T1"))
        .await
        .unwrap();

    let result = h
        .consumer
        .update(UpdateRequest::completed(
            QueueName::Webhook,
            "J1",
            PollToken::from("T2"),
        ))
        .await;

    assert!(matches!(result, Err(JobError::LockMismatch(_))));
    assert!(!h.broker.job("J1").unwrap().is_finished());
    assert_eq!(h.sink.codes(), vec!["lock_mismatch"]);
}

#[tokio::test]
async fn test_init_creates_every_worker() {
    let h = Harness::new();

    assert_ok!(h.consumer.init().await);

    assert_eq!(h.consumer.registry().len(), QueueName::ALL.len());
    for queue in QueueName::ALL {
        assert_eq!(h.connector.connects(queue), 1);
    }
}

#[tokio::test]
async fn test_init_fails_when_any_worker_fails() {
    let h = Harness::with(HarnessOptions {
        refused: Some(QueueName::OneTime),
        ..Default::default()
    });

    let err = assert_err!(h.consumer.init().await);

    assert!(matches!(err, JobError::Connection { .. }));
    assert!(h.consumer.registry().get(QueueName::OneTime).is_none());
    assert!(h.consumer.registry().get(QueueName::Webhook).is_some());
}

#[tokio::test]
async fn test_close_closes_every_worker() {
    let h = Harness::new();
    h.consumer.init().await.unwrap();

    h.consumer.close().await.unwrap();

    let mut closed: Vec<String> = h
        .broker
        .events()
        .into_iter()
        .filter(|e| e.starts_with("close:"))
        .collect();
    closed.sort();
    assert_eq!(
        closed,
        vec!["close:oneTimeJobs", "close:repeatableJobs", "close:webhookJobs"]
    );
    assert!(h.consumer.registry().is_empty());
}

#[tokio::test]
async fn test_consumer_manager_interface() {
    let h = Harness::new();
    h.broker.push(QueueName::Scheduled, "R1", json!({ "cron": "* * * * *" }));
    let manager: &dyn ConsumerManager = &h.consumer;

    manager.init().await.unwrap();
    let token = PollToken::generate();
    let job = manager
        .poll(QueueName::Scheduled, &token)
        .await
        .unwrap()
        .unwrap();
    manager
        .update(UpdateRequest::completed(QueueName::Scheduled, job.id, token))
        .await
        .unwrap();
    manager.close().await.unwrap();

    assert!(h.broker.job("R1").unwrap().is_finished());
}
