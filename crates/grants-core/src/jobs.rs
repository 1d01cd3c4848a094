//! Job worker loop: periodic cooperative execution of maintenance jobs
//! with bounded retry. Jobs never pre-empt each other and share no mutable
//! state outside the store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

/// `true` when the job did meaningful work this tick (attempted), `false`
/// when there was nothing to do. An error is reported to telemetry either
/// way.
pub type JobResult = (bool, Option<anyhow::Error>);
pub type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = JobResult> + Send>> + Send + Sync>;

pub struct JobSpec {
    pub name: &'static str,
    pub worker_count: usize,
    pub cadence: Duration,
    pub func: JobFn,
}

const MAX_IDLE_SPINS: u32 = 5;

/// Spawns `worker_count` executors per job; each executor loops the
/// attempted/err protocol until `shutdown` fires.
pub struct JobRunner {
    shutdown: watch::Sender<bool>,
}

impl JobRunner {
    pub fn start(jobs: Vec<JobSpec>) -> (Self, Vec<tokio::task::JoinHandle<()>>) {
        let (tx, rx) = watch::channel(false);
        let mut handles = Vec::new();
        for job in jobs {
            for worker_id in 0..job.worker_count {
                let func = job.func.clone();
                let cadence = job.cadence;
                let name = job.name;
                let mut shutdown_rx = rx.clone();
                handles.push(tokio::spawn(async move {
                    run_executor(name, worker_id, func, cadence, &mut shutdown_rx).await;
                }));
            }
        }
        (Self { shutdown: tx }, handles)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_executor(
    name: &'static str,
    worker_id: usize,
    func: JobFn,
    cadence: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut idle_spins = 0u32;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let (attempted, err) = func().await;
        if let Some(err) = err {
            error!(job = name, worker_id, error = %err, "job execution failed");
        }

        if attempted {
            idle_spins = 0;
            if wait_or_shutdown(cadence, shutdown_rx).await {
                break;
            }
        } else {
            idle_spins += 1;
            if idle_spins >= MAX_IDLE_SPINS {
                idle_spins = 0;
                if wait_or_shutdown(cadence, shutdown_rx).await {
                    break;
                }
            }
        }
    }
    info!(job = name, worker_id, "job executor exiting");
}

/// Returns `true` if shutdown fired while waiting.
async fn wait_or_shutdown(cadence: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(cadence) => false,
        _ = shutdown_rx.changed() => true,
    }
}
