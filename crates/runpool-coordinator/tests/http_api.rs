use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use tokio::net::TcpListener;

use runpool_coordinator::http::{router, SubmitResponse};
use runpool_coordinator::study::seed_runs;
use runpool_coordinator::{CoordinatorConfig, LockManager, RunCoordinator};
use runpool_core::types::{ClientRun, Parameters, StudyId};
use runpool_store::MemoryStore;

async fn spawn_server(runs: usize) -> Result<SocketAddr> {
    let store = Arc::new(MemoryStore::default());
    let run_ids = seed_runs(
        store.as_ref(),
        (0..runs).map(|i| Parameters::new(vec![i as f64, 0.0])).collect(),
    )?;
    let cfg = CoordinatorConfig {
        study_id: StudyId("s1".to_string()),
        max_attempts: 1,
        retry_interval: Duration::from_millis(10),
    };
    let coordinator = Arc::new(RunCoordinator::new(
        cfg,
        store,
        LockManager::default(),
        run_ids,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(coordinator)).await;
    });
    Ok(addr)
}

fn api(addr: SocketAddr, participant: &str) -> String {
    format!("http://{addr}/api?participantId={participant}&studyId=s1")
}

#[tokio::test]
async fn assign_then_submit_over_http() -> Result<()> {
    let addr = spawn_server(1).await?;
    let client = reqwest::Client::new();

    let resp = client.get(api(addr, "alice")).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let run: ClientRun = resp.json().await?;
    assert_eq!(run.parameters.values, vec![0.0, 0.0]);

    let resp = client.get(api(addr, "bob")).send().await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let submission = ClientRun {
        parameters: Parameters::new(vec![1.5, -2.5]),
        ..run.clone()
    };
    let resp = client
        .post(api(addr, "alice"))
        .json(&submission)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: SubmitResponse = resp.json().await?;
    assert_eq!(body.status, "accepted");

    let resp = client
        .post(api(addr, "alice"))
        .json(&submission)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: SubmitResponse = resp.json().await?;
    assert_eq!(body.status, "not_applied");
    assert_eq!(body.reason.as_deref(), Some("already_updated"));

    let resp = client.get(api(addr, "alice")).send().await?;
    assert_eq!(resp.status(), StatusCode::GONE);

    let resp = client.get(api(addr, "bob")).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let run: ClientRun = resp.json().await?;
    assert_eq!(run.parameters.values, vec![1.5, -2.5]);
    Ok(())
}

#[tokio::test]
async fn malformed_requests_are_bad_request() -> Result<()> {
    let addr = spawn_server(1).await?;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/api?participantId=alice"))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .get(format!("http://{addr}/api?participantId=a:b&studyId=s1"))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .get(format!("http://{addr}/api?participantId=alice&studyId=other"))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(api(addr, "alice"))
        .json(&serde_json::json!({ "id": "x", "checkValue": "y" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(api(addr, "alice"))
        .json(&serde_json::json!({
            "id": "missing",
            "checkValue": "y",
            "parameters": { "values": [1.0, 2.0], "length": 2 }
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn health_reports_ok() -> Result<()> {
    let addr = spawn_server(1).await?;
    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}
