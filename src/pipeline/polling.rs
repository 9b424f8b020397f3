//! Triggered polling loop.
//!
//! Runs one cycle per trigger: `prepare` discovers a batch and merges its
//! schema, `process` writes and commits it. Shutdown is only observed while
//! preparing or waiting, so a batch that started committing always finishes.

use async_trait::async_trait;
use rand::Rng;
use snafu::prelude::*;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{RetryConfig, TriggerConfig};
use crate::emit;
use crate::error::{ErrorDisposition, PipelineError, RetriesExhaustedSnafu};
use crate::metrics::events::{CycleCompleted, CycleOutcome};

use super::backoff::Backoff;

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// A batch was committed.
    ProcessedItems,
    /// No new files were available.
    NoItems,
    /// Shutdown was requested.
    Shutdown,
}

/// Trait for implementing a triggered cycle processor.
#[async_trait]
pub trait PollingProcessor {
    /// The state prepared for each iteration.
    type State: Send;

    /// Prepare state for a processing iteration.
    ///
    /// Returns `None` if there's no work to do.
    ///
    /// # Arguments
    /// * `cold_start` - True on the first iteration
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, PipelineError>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, PipelineError>;

    /// Table name for logging and metrics.
    fn target(&self) -> &str;
}

/// Run the polling loop until shutdown, a fatal error, or (with
/// `available_now`) until no new files remain.
///
/// Transient failures back off exponentially; aborted cycles wait for the
/// next trigger. In `available_now` mode an aborted cycle ends the run.
pub async fn run_polling_loop<P: PollingProcessor + Send>(
    processor: &mut P,
    trigger: &TriggerConfig,
    retry: &RetryConfig,
    shutdown: CancellationToken,
) -> Result<(), PipelineError> {
    let target = processor.target().to_string();
    let mut backoff = Backoff::new(retry);
    let mut first_iteration = true;

    loop {
        let started = Instant::now();

        // Race preparation against shutdown signal
        let shutdown_clone = shutdown.clone();
        let result = tokio::select! {
            biased;

            _ = shutdown_clone.cancelled() => {
                info!(table = %target, "Shutdown requested during preparation");
                return Ok(());
            }

            result = async {
                let cold_start = first_iteration;
                first_iteration = false;
                processor.prepare(cold_start).await
            } => result,
        };

        let result = match result {
            Ok(Some(state)) => processor.process(state).await,
            Ok(None) => Ok(IterationResult::NoItems),
            Err(e) => Err(e),
        };

        let wait = match result {
            Ok(IterationResult::Shutdown) => break,
            Ok(IterationResult::ProcessedItems) => {
                backoff.reset();
                record_cycle(&target, CycleOutcome::Committed, started);
                if trigger.available_now {
                    continue;
                }
                info!(
                    table = %target,
                    "Cycle complete, waiting {}s before next trigger",
                    trigger.interval_secs
                );
                trigger_delay(trigger)
            }
            Ok(IterationResult::NoItems) => {
                backoff.reset();
                record_cycle(&target, CycleOutcome::Idle, started);
                if trigger.available_now {
                    info!(table = %target, "No new files, all available data processed");
                    break;
                }
                info!(
                    table = %target,
                    "No new files, waiting {}s before next trigger",
                    trigger.interval_secs
                );
                trigger_delay(trigger)
            }
            Err(e) => match e.disposition() {
                ErrorDisposition::Retry => match backoff.next_delay() {
                    Some(delay) => {
                        record_cycle(&target, CycleOutcome::Retried, started);
                        warn!(
                            table = %target,
                            "Cycle failed (attempt {}), retrying in {:?}: {}",
                            backoff.attempts(),
                            delay,
                            snafu::Report::from_error(&e)
                        );
                        delay
                    }
                    None => {
                        record_cycle(&target, CycleOutcome::Failed, started);
                        let attempts = backoff.attempts();
                        error!(table = %target, "Giving up after {} attempts", attempts);
                        return Err(e).context(RetriesExhaustedSnafu { attempts });
                    }
                },
                ErrorDisposition::Abort if !trigger.available_now => {
                    record_cycle(&target, CycleOutcome::Aborted, started);
                    error!(
                        table = %target,
                        "Cycle aborted, retrying from the last checkpoint on the next trigger: {}",
                        snafu::Report::from_error(&e)
                    );
                    trigger_delay(trigger)
                }
                ErrorDisposition::Abort | ErrorDisposition::Fatal => {
                    record_cycle(&target, CycleOutcome::Failed, started);
                    error!(
                        table = %target,
                        "Stopping pipeline: {}",
                        snafu::Report::from_error(&e)
                    );
                    return Err(e);
                }
            },
        };

        // Wait for the next trigger or shutdown
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(table = %target, "Shutdown requested while waiting for trigger");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }

    Ok(())
}

fn record_cycle(target: &str, outcome: CycleOutcome, started: Instant) {
    emit!(CycleCompleted {
        target: target.to_string(),
        outcome,
        duration: started.elapsed(),
    });
}

/// Trigger interval plus random jitter.
fn trigger_delay(trigger: &TriggerConfig) -> Duration {
    let jitter = if trigger.jitter_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..=trigger.jitter_secs * 1000))
    } else {
        Duration::ZERO
    };
    trigger.interval() + jitter
}
