//! Background producer task and its cooperative stop protocol.
//!
//! The producer task runs bounded rounds until it sees a stop request at a
//! round boundary, then acknowledges exactly once and exits. The coordinator
//! raises the request and waits for that acknowledgment; it never kills the
//! task. Only teardown aborts a task that outlives its grace period.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::environment::{CaseEnv, TestEnvironment};
use crate::errors::{HarnessError, HarnessResult};
use crate::state::SharedTestState;
use crate::types::Entity;

/// Floor for poll and round pauses so a zero setting cannot spin.
const MIN_WAIT: Duration = Duration::from_millis(10);

/// What the producer loop did before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerSummary {
    /// Rounds that completed, successful or not.
    pub rounds: u32,
    pub failed_rounds: u32,
    /// Whether the loop exited through the stop acknowledgment.
    pub acknowledged: bool,
}

/// Handle to a running producer task.
#[derive(Debug)]
pub struct ProducerHandle {
    task: JoinHandle<ProducerSummary>,
    state: Arc<SharedTestState>,
}

impl ProducerHandle {
    /// True once the producer loop has returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the task to stop and give it `grace` to finish; abort it otherwise.
    pub async fn shutdown(mut self, grace: Duration) -> Option<ProducerSummary> {
        self.state.request_stop();
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(e)) => {
                warn!(component = "ProducerCoordinator", error = %e, "Producer task ended abnormally");
                None
            }
            Err(_) => {
                warn!(
                    component = "ProducerCoordinator",
                    grace_secs = grace.as_secs(),
                    "Producer task did not stop in time, aborting"
                );
                self.task.abort();
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
/// Runs the background producer and the stop/acknowledge handshake with it.
///
/// The stop request and the acknowledgment are flags on [`SharedTestState`];
/// the producer checks the request only between rounds, so a stop never cuts
/// a round short.
pub struct ProducerCoordinator {
    round_pause: Duration,
    observe_pause: Duration,
    poll_interval: Duration,
    ack_timeout: Option<Duration>,
}

impl ProducerCoordinator {
    /// Pauses come from `timings`, floored at [`MIN_WAIT`].
    pub fn new(timings: &Timings) -> Self {
        Self {
            round_pause: timings.producer_round_pause(),
            observe_pause: timings.stop_observe(),
            poll_interval: timings.ack_poll(),
            ack_timeout: timings.ack_timeout(),
        }
    }

    /// Spawn the producer loop for `entity`.
    ///
    /// Each round runs one batch through the environment, then pauses. A
    /// failed round is logged and counted, not fatal.
    pub fn start_producer<E: TestEnvironment>(
        &self,
        env: Arc<E>,
        case: Arc<CaseEnv>,
        entity: Entity,
        state: Arc<SharedTestState>,
    ) -> ProducerHandle {
        let round_pause = self.round_pause.max(MIN_WAIT);
        let task_state = Arc::clone(&state);

        let task = tokio::spawn(async move {
            let state = task_state;
            let mut summary = ProducerSummary::default();
            info!(
                component = "ProducerCoordinator",
                testcase = %case.name(),
                entity = %entity.id,
                "Producer task started"
            );

            while !state.stop_requested() {
                match env.run_producer_round(&case, &entity).await {
                    Ok(()) => summary.rounds += 1,
                    Err(e) => {
                        summary.failed_rounds += 1;
                        warn!(
                            component = "ProducerCoordinator",
                            entity = %entity.id,
                            error = %e,
                            "Producer round failed"
                        );
                    }
                }
                if state.stop_requested_within(round_pause).await {
                    break;
                }
            }

            // All writes have ceased once the loop exits.
            summary.acknowledged = state.acknowledge_stop();
            info!(
                component = "ProducerCoordinator",
                rounds = summary.rounds,
                failed_rounds = summary.failed_rounds,
                "Producer task stopped"
            );
            summary
        });

        ProducerHandle { task, state }
    }

    /// Request a stop and block until the producer acknowledges it.
    ///
    /// Without an acknowledgment timeout this waits indefinitely.
    pub async fn stop_producer_and_await(&self, state: &SharedTestState) -> HarnessResult<()> {
        state.request_stop();
        info!(component = "ProducerCoordinator", "Requested producer stop");
        tokio::time::sleep(self.observe_pause).await;

        let poll = self.poll_interval.max(MIN_WAIT);
        let started = Instant::now();
        loop {
            if state.acknowledged_within(poll).await {
                break;
            }
            let waited = started.elapsed();
            debug!(
                component = "ProducerCoordinator",
                waited_secs = waited.as_secs(),
                "Waiting for producer to acknowledge stop"
            );
            if let Some(limit) = self.ack_timeout
                && waited >= limit
            {
                return Err(HarnessError::AckTimeout(limit));
            }
        }

        info!(component = "ProducerCoordinator", "Producer acknowledged stop");
        tokio::time::sleep(self.observe_pause).await;
        Ok(())
    }
}
