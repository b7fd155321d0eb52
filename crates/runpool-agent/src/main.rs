#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};

use runpool_core::types::{ClientRun, Parameters};

#[derive(Debug, Parser)]
#[command(name = "runpool-agent")]
struct Args {
    /// Coordinator base URL, e.g. http://127.0.0.1:3000
    #[arg(long, env = "RUNPOOL_COORD_URL", default_value = "http://127.0.0.1:3000")]
    coord_url: String,

    #[arg(long, env = "RUNPOOL_STUDY_ID", default_value = "local-study")]
    study_id: String,

    #[arg(long, env = "RUNPOOL_PARTICIPANT_ID", default_value = "local-participant")]
    participant_id: String,

    /// Added to every parameter before submitting.
    #[arg(long, env = "RUNPOOL_AGENT_DELTA", default_value_t = 1.0)]
    delta: f64,

    /// Simulated work time per run.
    #[arg(long, env = "RUNPOOL_AGENT_WORK_MS", default_value_t = 0)]
    work_ms: u64,

    /// Stop after this many accepted updates (0 = until exhausted).
    #[arg(long, env = "RUNPOOL_AGENT_MAX_RUNS", default_value_t = 0)]
    max_runs: u64,

    /// Back-off when the coordinator reports that every run is locked.
    #[arg(long, env = "RUNPOOL_AGENT_IDLE_MS", default_value_t = 2_000)]
    idle_ms: u64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

enum Poll {
    Run(ClientRun),
    Busy,
    Done,
}

struct Agent {
    client: reqwest::Client,
    url: String,
}

impl Agent {
    fn new(args: &Args) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(30))
            .build()?;
        let base = args.coord_url.trim_end_matches('/');
        let url = format!(
            "{base}/api?participantId={}&studyId={}",
            args.participant_id, args.study_id
        );
        Ok(Self { client, url })
    }

    async fn poll(&self) -> Result<Poll> {
        let resp = with_retry(|| self.client.get(&self.url).send()).await?;
        match resp.status() {
            StatusCode::OK => Ok(Poll::Run(resp.json().await?)),
            StatusCode::CONFLICT => Ok(Poll::Busy),
            StatusCode::GONE => Ok(Poll::Done),
            status => {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("assignment failed: {status}: {body}")
            }
        }
    }

    async fn submit(&self, run: &ClientRun) -> Result<SubmitResponse> {
        let resp = with_retry(|| self.client.post(&self.url).json(run).send()).await?;
        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("submission failed: {status}: {body}");
        }
        Ok(resp.json().await?)
    }
}

fn perturb(params: &Parameters, delta: f64) -> Parameters {
    Parameters::new(params.values.iter().map(|v| v + delta).collect())
}

async fn with_retry<F, Fut>(mut f: F) -> Result<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    const MAX_ATTEMPTS: usize = 5;
    const BASE_DELAY_MS: u64 = 100;
    const MAX_DELAY_MS: u64 = 2_000;

    let mut attempt: usize = 0;
    let mut delay_ms: u64 = BASE_DELAY_MS;
    loop {
        attempt = attempt.saturating_add(1);
        match f().await {
            Ok(resp) if resp.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                warn!(status = %resp.status(), attempt, "coordinator error; retrying");
            }
            Ok(resp) => return Ok(resp),
            Err(err) if (err.is_timeout() || err.is_connect()) && attempt < MAX_ATTEMPTS => {
                warn!(error = %err, attempt, "coordinator unreachable; retrying");
            }
            Err(err) => return Err(anyhow::Error::new(err)),
        }
        let jitter = runpool_observe::time::unix_time_ms() % 37;
        tokio::time::sleep(Duration::from_millis(delay_ms.saturating_add(jitter))).await;
        delay_ms = delay_ms.saturating_mul(2).min(MAX_DELAY_MS);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    runpool_observe::logging::init_tracing();

    let args = Args::parse();
    let span = info_span!(
        "runpool-agent",
        study_id = %args.study_id,
        participant_id = %args.participant_id,
        coord_url = %args.coord_url
    );

    async move {
        info!("starting agent");
        let agent = Agent::new(&args)?;
        let mut accepted: u64 = 0;

        loop {
            if args.max_runs > 0 && accepted >= args.max_runs {
                info!(accepted, "reached max runs");
                break;
            }
            let run = match agent.poll().await? {
                Poll::Run(run) => run,
                Poll::Busy => {
                    info!(idle_ms = args.idle_ms, "all runs locked; backing off");
                    tokio::time::sleep(Duration::from_millis(args.idle_ms)).await;
                    continue;
                }
                Poll::Done => {
                    info!(accepted, "no runs left for participant");
                    break;
                }
            };

            info!(run_id = %run.id, "working on run");
            if args.work_ms > 0 {
                tokio::time::sleep(Duration::from_millis(args.work_ms)).await;
            }
            let update = ClientRun {
                parameters: perturb(&run.parameters, args.delta),
                ..run
            };
            let resp = agent.submit(&update).await?;
            if resp.status == "accepted" {
                accepted = accepted.saturating_add(1);
                info!(run_id = %update.id, accepted, "update accepted");
            } else {
                warn!(
                    run_id = %update.id,
                    reason = resp.reason.as_deref().unwrap_or("unknown"),
                    "update not applied"
                );
            }
        }
        Ok(())
    }
    .instrument(span)
    .await
}
