//! Interval-driven refresh loop with an audit record per cycle.

use std::future::{self, Future};
use std::task::Poll;
use std::time::Duration;

use autopilot_core::CycleResult;
use autopilot_storage::AuditSink;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::SyncPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

pub struct RefreshScheduler {
    pipeline: SyncPipeline,
    audit: AuditSink,
    interval: Duration,
    state: SchedulerState,
    cycles_run: usize,
    last_result: Option<CycleResult>,
}

impl RefreshScheduler {
    pub fn new(pipeline: SyncPipeline, audit: AuditSink, interval: Duration) -> Self {
        Self {
            pipeline,
            audit,
            // a zero period would make the interval timer panic
            interval: interval.max(Duration::from_millis(1)),
            state: SchedulerState::Idle,
            cycles_run: 0,
            last_result: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cycles_run(&self) -> usize {
        self.cycles_run
    }

    pub fn last_result(&self) -> Option<&CycleResult> {
        self.last_result.as_ref()
    }

    pub fn pipeline(&self) -> &SyncPipeline {
        &self.pipeline
    }

    /// Run one cycle and append its outcome to the audit sink. A sink
    /// failure is logged and does not change the cycle's result.
    pub async fn run_cycle(&mut self) -> CycleResult {
        self.state = SchedulerState::Running;
        let result = self.pipeline.run_cycle().await;
        if let Err(err) = self.audit.record(&result).await {
            error!(run_id = %result.run_id, error = %format!("{err:#}"), "failed to write changelog");
        }
        self.state = SchedulerState::Idle;
        self.cycles_run += 1;
        self.last_result = Some(result.clone());
        result
    }

    /// Run a cycle now, then one per interval measured from the previous
    /// cycle start, until `shutdown` resolves. Shutdown is only observed
    /// between cycles, but `shutdown` is polled once before the first cycle
    /// so listeners such as Ctrl-C are armed from the start. Returns the
    /// number of cycles run.
    pub async fn run_until<F>(&mut self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let started = self.cycles_run;
        info!(
            interval_secs = self.interval.as_secs(),
            "starting refresh scheduler"
        );
        tokio::pin!(shutdown);
        let stop_requested =
            future::poll_fn(|cx| Poll::Ready(shutdown.as_mut().poll(cx).is_ready())).await;

        let first_start = Instant::now();
        self.run_cycle().await;
        if stop_requested {
            info!("shutdown requested; stopping refresh scheduler");
            return self.cycles_run - started;
        }

        let mut ticker = time::interval_at(first_start + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested; stopping refresh scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        self.cycles_run - started
    }

    /// Run until the process receives Ctrl-C.
    pub async fn run_until_interrupted(&mut self) -> usize {
        self.run_until(interrupt()).await
    }
}

async fn interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "cannot listen for Ctrl-C; scheduler will run until killed");
        std::future::pending::<()>().await;
    }
}
