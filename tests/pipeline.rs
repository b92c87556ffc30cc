//! End-to-end: cron fire -> queue -> HTTP call -> SQLite history.
//!
//! These run in real time against a local mock server, so each waits a few
//! seconds for every-second schedules to fire.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use croncall::invoker::HttpInvoker;
use croncall::job::{ExecutionRecord, JobId};
use croncall::scheduler::Scheduler;
use croncall::storage::{self, SqliteStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn wait_for_history(store: &SqliteStore, job_id: &JobId) -> Result<Vec<ExecutionRecord>> {
    for _ in 0..100 {
        let records = store.recent_executions(job_id, 5).await?;
        if !records.is_empty() {
            return Ok(records);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("no execution recorded for {job_id}")
}

fn open_store(dir: &tempfile::TempDir) -> Result<SqliteStore> {
    let db = dir.path().join("croncall.db");
    Ok(SqliteStore::new(storage::open_pool(db.to_str().unwrap())?))
}

#[tokio::test]
async fn test_scheduled_calls_are_recorded() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let store = open_store(&dir)?;
    let ok = store
        .create_job("* * * * * *", &format!("{}/ok", server.uri()), "http")
        .await?;
    let broken = store
        .create_job("* * * * * *", &format!("{}/broken", server.uri()), "http")
        .await?;

    let invoker = HttpInvoker::new(Duration::from_secs(5))?;
    let scheduler = Scheduler::new(Arc::new(store.clone()), Arc::new(invoker), 10);
    assert_eq!(scheduler.start().await, 2);

    let ok_history = wait_for_history(&store, &ok.id).await?;
    assert!(ok_history.iter().all(|r| r.status_code == Some(204) && r.success));

    let broken_history = wait_for_history(&store, &broken.id).await?;
    assert!(broken_history
        .iter()
        .all(|r| r.status_code == Some(500) && !r.success));

    assert!(scheduler.shutdown(Duration::from_secs(10)).await);
    Ok(())
}

#[tokio::test]
async fn test_unresponsive_target_records_408() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let store = open_store(&dir)?;
    let job = store.create_job("* * * * * *", &server.uri(), "http").await?;

    let timeout = Duration::from_millis(500);
    let scheduler = Scheduler::new(
        Arc::new(store.clone()),
        Arc::new(HttpInvoker::new(timeout)?),
        10,
    );
    scheduler.start().await;

    let history = wait_for_history(&store, &job.id).await?;
    let first = &history[history.len() - 1];
    assert_eq!(first.status_code, Some(408));
    assert!(!first.success);
    assert!(first.duration_ms >= 500, "duration was {}", first.duration_ms);
    assert!(first.duration_ms < 30_000);

    scheduler.shutdown(Duration::from_secs(5)).await;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_target_records_without_status() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let dir = tempfile::TempDir::new()?;
    let store = open_store(&dir)?;
    let job = store
        .create_job("* * * * * *", &format!("http://{addr}/"), "http")
        .await?;

    let scheduler = Scheduler::new(
        Arc::new(store.clone()),
        Arc::new(HttpInvoker::new(Duration::from_secs(2))?),
        10,
    );
    scheduler.start().await;

    let history = wait_for_history(&store, &job.id).await?;
    assert!(history.iter().all(|r| r.status_code.is_none() && !r.success));

    scheduler.shutdown(Duration::from_secs(5)).await;
    Ok(())
}
