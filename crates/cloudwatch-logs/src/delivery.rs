// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered, serialized delivery of batches to one destination.
//!
//! # Delivery model
//!
//! ```text
//!   log_many ──> LogBatcher::add_logs ──> BatchQueue
//!                                            │ pop (oldest first)
//!                                            v
//!                            ┌──────── state lock ────────┐
//!                            │ ensure stream (and group)  │
//!                            │ PutLogEvents               │
//!                            │ classify, repair, retry    │
//!                            └────────────────────────────┘
//! ```
//!
//! Appending to the queue never waits on the network. Everything that talks
//! to the service or touches the sequence token and existence flags runs
//! under a per-destination async mutex, so concurrent callers serialize while
//! independent destinations proceed in parallel.
//!
//! A batch that still fails after the configured number of attempts is put
//! back at the head of the queue and the error is returned; the next call on
//! this engine retries it before anything newer. The same happens when a
//! caller drops its `log_many` future while a batch is in flight.
//!
//! `DataAlreadyAcceptedException` is taken at its word: the batch counts as
//! delivered even though the service may be acknowledging an overlapping
//! batch from an earlier process. Delivery is at-least-once and the stream
//! may contain duplicates after a crash.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::batcher::{Batch, BatchQueue, LogBatcher};
use crate::classifier::{
    classify_creation, classify_put, Classification, CreationOutcome, FatalReason, RepairAction,
};
use crate::config::Config;
use crate::destination::Destination;
use crate::errors::CloudWatchError;
use crate::transport::{Operation, Transport, TransportResponse};

/// Remote state cached by the engine. Only touched under the state lock.
#[derive(Debug, Default)]
struct DeliveryState {
    sequence_token: Option<String>,
    stream_created: bool,
    group_created: bool,
}

pub struct DeliveryEngine {
    destination: Destination,
    batcher: LogBatcher,
    state: Mutex<DeliveryState>,
    transport: Arc<dyn Transport>,
    delay: Duration,
    attempts: u32,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(destination: Destination, config: &Config, transport: Arc<dyn Transport>) -> Self {
        DeliveryEngine {
            destination,
            batcher: LogBatcher::new(config.large_message_behavior),
            state: Mutex::new(DeliveryState::default()),
            transport,
            delay: config.delay,
            attempts: config.attempts(),
        }
    }

    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Number of batches waiting to be delivered.
    #[must_use]
    pub fn pending_batches(&self) -> usize {
        self.batcher.queue().len()
    }

    /// Token that will accompany the next write.
    pub async fn sequence_token(&self) -> Option<String> {
        self.state.lock().await.sequence_token.clone()
    }

    /// Whether the stream is believed to exist.
    pub async fn stream_created(&self) -> bool {
        self.state.lock().await.stream_created
    }

    /// Whether this engine has created the group.
    pub async fn group_created(&self) -> bool {
        self.state.lock().await.group_created
    }

    pub async fn log(&self, message: impl AsRef<str>) -> Result<(), CloudWatchError> {
        self.log_many([message]).await
    }

    /// Queues `messages` under one timestamp and delivers everything queued.
    ///
    /// Returns once the queue is empty, or with the first error that
    /// survives all retries.
    pub async fn log_many<I, S>(&self, messages: I) -> Result<(), CloudWatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.destination.validate()?;
        self.batcher.add_logs(messages, now_millis())?;
        self.drain().await
    }

    /// Delivers whatever is queued, e.g. batches kept after a failed call.
    pub async fn flush(&self) -> Result<(), CloudWatchError> {
        self.destination.validate()?;
        self.drain().await
    }

    async fn drain(&self) -> Result<(), CloudWatchError> {
        while !self.batcher.queue().is_empty() {
            self.pace().await;
            let mut state = self.state.lock().await;
            // Another caller may have emptied the queue while we waited.
            let Some(batch) = self.batcher.queue().pop() else {
                break;
            };
            let in_flight = InFlight::new(self.batcher.queue(), batch);
            if let Err(e) = self.send_logs(&mut state, in_flight.batch()).await {
                error!(
                    "CLOUDWATCH | Failed to deliver {} events to {} after {} attempts: {e}",
                    in_flight.batch().len(),
                    self.destination,
                    self.attempts
                );
                return Err(e);
            }
            in_flight.delivered();
        }
        Ok(())
    }

    async fn pace(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Sends one batch, repairing and retrying up to the attempt budget.
    async fn send_logs(
        &self,
        state: &mut DeliveryState,
        batch: &Batch,
    ) -> Result<(), CloudWatchError> {
        let mut attempt = 1;
        loop {
            let err = match self.attempt(state, batch).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if attempt >= self.attempts {
                return Err(err);
            }
            debug!(
                "CLOUDWATCH | Attempt {attempt}/{} for {} failed: {err}",
                self.attempts, self.destination
            );
            attempt += 1;
            self.pace().await;
        }
    }

    async fn attempt(
        &self,
        state: &mut DeliveryState,
        batch: &Batch,
    ) -> Result<(), CloudWatchError> {
        self.ensure_stream(state).await?;

        let body = self.put_body(batch, state.sequence_token.as_deref());
        debug!(
            "CLOUDWATCH | Sending {} events ({} bytes) to {}",
            batch.len(),
            batch.size_bytes(),
            self.destination
        );
        let response = self.send(Operation::PutLogEvents, body).await?;

        match classify_put(response.as_ref(), state.sequence_token.as_deref()) {
            Classification::Accepted(token) => {
                state.sequence_token = token;
                Ok(())
            }
            Classification::RetryAfterRepair(action) => {
                warn!(
                    "CLOUDWATCH | Repairing {action:?} for {} before retrying",
                    self.destination
                );
                let err = response_error(Operation::PutLogEvents, response.as_ref());
                self.repair(state, action).await?;
                Err(err)
            }
            Classification::Fatal(reason) => Err(fatal_error(Operation::PutLogEvents, reason)),
        }
    }

    async fn repair(
        &self,
        state: &mut DeliveryState,
        action: RepairAction,
    ) -> Result<(), CloudWatchError> {
        match action {
            RepairAction::AdoptToken(token) => {
                state.sequence_token = token;
                Ok(())
            }
            // Recreated by the next attempt.
            RepairAction::RecreateStream => {
                state.stream_created = false;
                Ok(())
            }
            RepairAction::RecreateGroup => {
                state.stream_created = false;
                self.create_group(state).await
            }
        }
    }

    async fn ensure_stream(&self, state: &mut DeliveryState) -> Result<(), CloudWatchError> {
        if state.stream_created {
            return Ok(());
        }
        self.create_stream(state).await?;
        state.stream_created = true;
        Ok(())
    }

    async fn create_stream(&self, state: &mut DeliveryState) -> Result<(), CloudWatchError> {
        match self.create(Operation::CreateLogStream).await? {
            CreationOutcome::GroupMissing(_) => {
                debug!(
                    "CLOUDWATCH | Log group {} is missing, creating it",
                    self.destination.group()
                );
                self.create_group(state).await?;
                creation_result(
                    Operation::CreateLogStream,
                    self.create(Operation::CreateLogStream).await?,
                )
            }
            outcome => creation_result(Operation::CreateLogStream, outcome),
        }
    }

    /// Issues `CreateLogGroup`. Only called once the group is known to be
    /// missing, so the cached flag is cleared until the call succeeds.
    async fn create_group(&self, state: &mut DeliveryState) -> Result<(), CloudWatchError> {
        state.group_created = false;
        let outcome = self.create(Operation::CreateLogGroup).await?;
        creation_result(Operation::CreateLogGroup, outcome)?;
        state.group_created = true;
        Ok(())
    }

    async fn create(&self, operation: Operation) -> Result<CreationOutcome, CloudWatchError> {
        let body = match operation {
            Operation::CreateLogGroup => json!({ "logGroupName": self.destination.group() }),
            _ => json!({
                "logGroupName": self.destination.group(),
                "logStreamName": self.destination.stream(),
            }),
        };
        debug!("CLOUDWATCH | Issuing {operation} for {}", self.destination);
        let response = self.send(operation, body).await?;
        Ok(classify_creation(response.as_ref()))
    }

    async fn send(
        &self,
        operation: Operation,
        body: serde_json::Value,
    ) -> Result<Option<TransportResponse>, CloudWatchError> {
        self.transport
            .send(operation, body)
            .await
            .map_err(|source| CloudWatchError::Transport { operation, source })
    }

    fn put_body(&self, batch: &Batch, sequence_token: Option<&str>) -> serde_json::Value {
        let mut body = json!({
            "logGroupName": self.destination.group(),
            "logStreamName": self.destination.stream(),
            "logEvents": batch.events(),
        });
        if let Some(token) = sequence_token {
            body["sequenceToken"] = json!(token);
        }
        body
    }
}

/// A popped batch that goes back to the head of its queue unless marked
/// delivered, including when the sending future is dropped.
struct InFlight<'a> {
    queue: &'a BatchQueue,
    batch: Option<Batch>,
}

impl<'a> InFlight<'a> {
    fn new(queue: &'a BatchQueue, batch: Batch) -> Self {
        InFlight {
            queue,
            batch: Some(batch),
        }
    }

    #[allow(clippy::expect_used)]
    fn batch(&self) -> &Batch {
        self.batch.as_ref().expect("batch taken before drop")
    }

    fn delivered(mut self) {
        self.batch = None;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.queue.prepend(batch);
        }
    }
}

fn creation_result(operation: Operation, outcome: CreationOutcome) -> Result<(), CloudWatchError> {
    match outcome {
        CreationOutcome::Created | CreationOutcome::AlreadyExists => Ok(()),
        CreationOutcome::GroupMissing(reason) | CreationOutcome::Failed(reason) => {
            Err(fatal_error(operation, reason))
        }
    }
}

fn fatal_error(operation: Operation, reason: FatalReason) -> CloudWatchError {
    match reason {
        FatalReason::NoResponse => CloudWatchError::NoResponse { operation },
        FatalReason::Service { status, body } => CloudWatchError::Service {
            operation,
            status,
            body,
        },
    }
}

fn response_error(operation: Operation, response: Option<&TransportResponse>) -> CloudWatchError {
    match response {
        Some(response) => CloudWatchError::Service {
            operation,
            status: response.status,
            body: response.body_text(),
        },
        None => CloudWatchError::NoResponse { operation },
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}
