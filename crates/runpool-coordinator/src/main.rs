#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};

use runpool_coordinator::archive::FsRunArchive;
use runpool_coordinator::study::{initialize_study, StudyConfig, StudySettings};
use runpool_coordinator::{CoordinatorConfig, LockConfig, LockManager, RunCoordinator};
use runpool_store::{FsStore, MemoryStore, VersionedStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreBackend {
    Memory,
    Fs,
}

#[derive(Debug, Parser)]
#[command(name = "runpool-coordinator")]
struct Args {
    /// Address to bind the HTTP server.
    #[arg(long, env = "RUNPOOL_BIND_ADDR", default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Study config JSON: {"id": .., "study": {"random": .., "nparams": .., "nruns": ..}}.
    ///
    /// When unset, `--study-id`, `--n-runs` and `--n-params` describe the study.
    #[arg(long, env = "RUNPOOL_STUDY_CONFIG")]
    study_config: Option<PathBuf>,

    #[arg(long, env = "RUNPOOL_STUDY_ID", default_value = "local-study")]
    study_id: String,

    #[arg(long, env = "RUNPOOL_N_RUNS", default_value_t = 10)]
    n_runs: usize,

    #[arg(long, env = "RUNPOOL_N_PARAMS", default_value_t = 2)]
    n_params: usize,

    #[arg(long, env = "RUNPOOL_STORE", value_enum, default_value_t = StoreBackend::Memory)]
    store: StoreBackend,

    /// Root directory for the fs store backend.
    #[arg(long, env = "RUNPOOL_STORE_ROOT", default_value = "/var/lib/runpool/store")]
    store_root: PathBuf,

    #[arg(long, env = "RUNPOOL_STORE_NAMESPACE", default_value = runpool_store::DEFAULT_NAMESPACE)]
    store_namespace: String,

    /// Directory receiving a JSON snapshot of each run after an accepted update.
    #[arg(long, env = "RUNPOOL_ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// How long an assignment holds its run before the lock auto-releases.
    #[arg(long, env = "RUNPOOL_LOCK_TTL_MS", default_value_t = 300_000)]
    lock_ttl_ms: u64,

    /// Passes over the candidate runs before answering "no runs available".
    #[arg(long, env = "RUNPOOL_ASSIGN_ATTEMPTS", default_value_t = 3)]
    assign_attempts: u32,

    /// Maximum wait between assignment passes.
    #[arg(long, env = "RUNPOOL_ASSIGN_RETRY_MS", default_value_t = 1_000)]
    assign_retry_ms: u64,

    /// Optional: periodically emit a metrics snapshot to logs.
    #[arg(long, env = "RUNPOOL_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 0)]
    metrics_snapshot_interval_ms: u64,
}

impl Args {
    fn study_config(&self) -> Result<StudyConfig> {
        let cfg = match &self.study_config {
            Some(path) => StudyConfig::load(path)?,
            None => StudyConfig {
                id: self.study_id.clone(),
                study: StudySettings {
                    random: true,
                    nparams: self.n_params,
                    nruns: self.n_runs,
                },
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn store(&self) -> Arc<dyn VersionedStore> {
        match self.store {
            StoreBackend::Memory => Arc::new(MemoryStore::new(self.store_namespace.clone())),
            StoreBackend::Fs => Arc::new(FsStore::with_namespace(
                self.store_root.clone(),
                self.store_namespace.clone(),
            )),
        }
    }
}

fn emit_metrics_snapshot(coordinator: &RunCoordinator) {
    let m = coordinator.metrics();
    let locks = coordinator.locks().stats();
    let latency = m.assign_latency.snapshot();
    tracing::info!(
        target: "runpool_metrics",
        assign_total = m.assign_total.get(),
        assigned_total = m.assigned_total.get(),
        exhausted_total = m.exhausted_total.get(),
        unavailable_total = m.unavailable_total.get(),
        submit_total = m.submit_total.get(),
        accepted_total = m.accepted_total.get(),
        not_applied_total = m.not_applied_total.get(),
        archive_failed_total = m.archive_failed_total.get(),
        lock_expired_total = locks.expired_total.get(),
        locked_runs = locks.held.get(),
        assign_latency_avg_ns = latency.avg_ns(),
        assign_latency_max_ns = latency.max_ns,
        study_id = %coordinator.study_id(),
        "metrics"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    runpool_observe::logging::init_tracing();

    let args = Args::parse();
    let study = args.study_config()?;
    let study_id = study.study_id()?;

    let span = info_span!(
        "runpool-coordinator",
        addr = %args.addr,
        study_id = %study_id,
        store = ?args.store
    );
    async move {
        info!("starting coordinator");
        if args.lock_ttl_ms == 0 {
            anyhow::bail!("RUNPOOL_LOCK_TTL_MS must be > 0");
        }

        let store = args.store();
        let run_ids = initialize_study(store.as_ref(), &study, &mut rand::thread_rng())?;

        let locks = LockManager::new(LockConfig {
            ttl: Duration::from_millis(args.lock_ttl_ms),
        });
        let cfg = CoordinatorConfig {
            study_id,
            max_attempts: args.assign_attempts,
            retry_interval: Duration::from_millis(args.assign_retry_ms),
        };
        let mut coordinator = RunCoordinator::new(cfg, store, locks, run_ids);
        if let Some(dir) = &args.archive_dir {
            coordinator = coordinator.with_archive(Arc::new(FsRunArchive::new(dir)));
        }
        let coordinator = Arc::new(coordinator);

        if args.metrics_snapshot_interval_ms > 0 {
            let coordinator = coordinator.clone();
            let interval_ms = args.metrics_snapshot_interval_ms;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    emit_metrics_snapshot(&coordinator);
                }
            });
        }

        let listener = TcpListener::bind(args.addr).await?;
        info!(addr = %listener.local_addr()?, runs = coordinator.run_ids().len(), "server ready");
        axum::serve(listener, runpool_coordinator::http::router(coordinator))
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            })
            .await?;
        Ok(())
    }
    .instrument(span)
    .await
}
