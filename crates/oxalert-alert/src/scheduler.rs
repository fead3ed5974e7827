use crate::evaluator::AlertEvaluator;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    cancel: Option<CancellationToken>,
    /// Loops not yet joined. A stopped loop may still be finishing its tick
    /// when a new one starts.
    handles: Vec<JoinHandle<()>>,
}

/// Drives [`AlertEvaluator::run_tick`] on a fixed interval.
///
/// Stopped → Running → Stopped. `start` runs one pass immediately, then one
/// per interval; a slow tick delays the next one instead of causing a burst.
/// `stop` only prevents further ticks: a tick already running completes.
pub struct AlertScheduler {
    evaluator: Arc<AlertEvaluator>,
    interval: Duration,
    state: Mutex<State>,
}

impl AlertScheduler {
    pub fn new(evaluator: Arc<AlertEvaluator>, interval: Duration) -> Self {
        Self {
            evaluator,
            interval,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts ticking. Must be called from within a tokio runtime.
    ///
    /// Returns `false` (and logs a warning) when already running.
    pub fn start(&self) -> bool {
        let mut state = self.lock();
        if state.cancel.is_some() {
            tracing::warn!("Alert scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let evaluator = Arc::clone(&self.evaluator);
        let period = self.interval;
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                evaluator.run_tick().await;
            }
            tracing::info!("Alert scheduler loop exited");
        });

        state.handles.retain(|h| !h.is_finished());
        state.cancel = Some(cancel);
        state.handles.push(handle);
        tracing::info!(interval_secs = period.as_secs(), "Alert scheduler started");
        true
    }

    /// Cancels future ticks. Idempotent.
    pub fn stop(&self) {
        let mut state = self.lock();
        match state.cancel.take() {
            Some(cancel) => {
                cancel.cancel();
                tracing::info!("Alert scheduler stopped");
            }
            None => tracing::debug!("Alert scheduler already stopped"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().cancel.is_some()
    }

    /// Stops the scheduler and waits for every in-flight tick to finish,
    /// including ticks of loops stopped earlier.
    pub async fn shutdown(&self) {
        self.stop();
        let handles = std::mem::take(&mut self.lock().handles);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Alert scheduler task panicked");
            }
        }
    }
}
