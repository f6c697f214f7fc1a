use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tracing::{error, info, warn};

use crate::error::ServingError;
use crate::reconciler::Reconciler;

/// Parses a cron expression. Classic five-field expressions get a leading
/// seconds field.
pub fn parse_schedule(expression: &str) -> Result<Schedule, ServingError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|err| ServingError::Validation(format!("invalid cron expression {expression:?}: {err}")))
}

/// Runs the reconciler on a cron schedule in a background thread.
pub struct ReconcileScheduler {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ReconcileScheduler {
    pub fn start(
        expression: &str,
        reconciler: Arc<Reconciler>,
        recheck_wait: Duration,
    ) -> Result<Self, ServingError> {
        let schedule = parse_schedule(expression)?;
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("reconciler".to_string())
            .spawn(move || loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    warn!("cron schedule has no upcoming run");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                match stopped.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => match reconciler.run(recheck_wait) {
                        Ok(report) => info!(repairs = report.repairs(), "scheduled cleanup finished"),
                        Err(err) => error!(error = %err, "scheduled cleanup failed"),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })
            .map_err(|err| ServingError::Validation(format!("spawning reconciler thread: {err}")))?;
        info!(cron = expression, "scheduled instance cleanup");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the schedule, waiting for a running pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("reconciler thread panicked");
            }
        }
    }
}

impl Drop for ReconcileScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
