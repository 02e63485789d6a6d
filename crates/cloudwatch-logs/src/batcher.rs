// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Packing of raw log messages into batches that respect the service limits.
//!
//! # Batching Strategy
//!
//! Messages are appended to the newest open batch until adding the next event
//! would break one of two limits:
//! 1. **Count limit**: at most [`constants::MAX_BATCH_EVENTS`] events
//! 2. **Size limit**: at most [`constants::MAX_BATCH_SIZE_BYTES`] bytes of messages
//!
//! When either limit would be exceeded the batch is sealed and a new one is
//! opened with the event. Messages longer than
//! [`constants::MAX_EVENT_SIZE_BYTES`] are first passed through the configured
//! [`OversizePolicy`].
//!
//! Packing is synchronous and never touches the network.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{self, TRUNCATION_MARKER};
use crate::errors::{CloudWatchError, ConfigError};

/// What to do with a message longer than the per-event cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Cut bytes out of the middle and insert a `...` marker.
    #[default]
    Truncate,
    /// Ship the message as several consecutive events.
    Split,
    /// Drop the message.
    Ignore,
    /// Fail the `add_logs` call.
    Error,
}

impl FromStr for OversizePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "split" => Ok(Self::Split),
            "ignore" => Ok(Self::Ignore),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::UnknownOversizePolicy(s.to_string())),
        }
    }
}

impl fmt::Display for OversizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Truncate => "truncate",
            Self::Split => "split",
            Self::Ignore => "ignore",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// The wire unit of `PutLogEvents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub message: String,
}

/// An ordered group of events submitted in one write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    events: Vec<EncodedEvent>,
    size_bytes: usize,
}

impl Batch {
    fn with_event(event: EncodedEvent) -> Self {
        let mut batch = Batch::default();
        batch.push(event);
        batch
    }

    fn push(&mut self, event: EncodedEvent) {
        self.size_bytes += event.message.len();
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[EncodedEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sum of the UTF-8 lengths of all messages.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// FIFO of sealed and open batches.
///
/// Every operation takes the internal lock for its whole duration, so appends
/// from any caller and pops from the delivery path never observe a half
/// updated sequence.
#[derive(Debug, Default)]
pub struct BatchQueue {
    batches: Mutex<VecDeque<Batch>>,
}

impl BatchQueue {
    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Batch>> {
        self.batches.lock().expect("lock poisoned")
    }

    /// Removes the oldest batch.
    pub fn pop(&self) -> Option<Batch> {
        self.lock().pop_front()
    }

    /// Puts a batch back at the head of the queue.
    pub fn prepend(&self, batch: Batch) {
        self.lock().push_front(batch);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the queued batches, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Batch> {
        self.lock().iter().cloned().collect()
    }
}

/// Turns raw messages into batches on a [`BatchQueue`].
#[derive(Debug)]
pub struct LogBatcher {
    policy: OversizePolicy,
    queue: BatchQueue,
    max_event_size_bytes: usize,
    max_batch_size_bytes: usize,
    max_batch_events: usize,
}

impl LogBatcher {
    /// Creates a batcher using the service limits.
    #[must_use]
    pub fn new(policy: OversizePolicy) -> Self {
        Self::with_limits(
            policy,
            constants::MAX_EVENT_SIZE_BYTES,
            constants::MAX_BATCH_SIZE_BYTES,
            constants::MAX_BATCH_EVENTS,
        )
    }

    /// Creates a batcher with custom limits, mostly useful in tests.
    ///
    /// The event cap is raised to at least four bytes so that a truncated
    /// message can hold the marker plus one character.
    #[must_use]
    pub fn with_limits(
        policy: OversizePolicy,
        max_event_size_bytes: usize,
        max_batch_size_bytes: usize,
        max_batch_events: usize,
    ) -> Self {
        LogBatcher {
            policy,
            queue: BatchQueue::default(),
            max_event_size_bytes: max_event_size_bytes.max(TRUNCATION_MARKER.len() + 1),
            max_batch_size_bytes,
            max_batch_events: max_batch_events.max(1),
        }
    }

    #[must_use]
    pub fn policy(&self) -> OversizePolicy {
        self.policy
    }

    #[must_use]
    pub fn queue(&self) -> &BatchQueue {
        &self.queue
    }

    /// Encodes `messages` with a shared `timestamp` and packs them onto the queue.
    ///
    /// Under [`OversizePolicy::Error`] an oversized message aborts the call;
    /// messages packed before it stay queued.
    pub fn add_logs<I, S>(&self, messages: I, timestamp: i64) -> Result<(), CloudWatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut batches = self.queue.lock();
        for message in messages {
            let message = message.as_ref();
            let size = message.len();
            if size <= self.max_event_size_bytes {
                self.add_to_stack(&mut batches, timestamp, message.to_string());
                continue;
            }

            match self.policy {
                OversizePolicy::Truncate => {
                    warn!(
                        "CLOUDWATCH | Truncating {size} byte log message to {} bytes",
                        self.max_event_size_bytes
                    );
                    let truncated = truncate_middle(message, self.max_event_size_bytes);
                    self.add_to_stack(&mut batches, timestamp, truncated);
                }
                OversizePolicy::Split => {
                    let chunks = split_chunks(message, self.max_event_size_bytes);
                    warn!(
                        "CLOUDWATCH | Splitting {size} byte log message into {} events",
                        chunks.len()
                    );
                    for chunk in chunks {
                        self.add_to_stack(&mut batches, timestamp, chunk.to_string());
                    }
                }
                OversizePolicy::Ignore => {
                    warn!("CLOUDWATCH | Dropping {size} byte log message");
                }
                OversizePolicy::Error => {
                    return Err(CloudWatchError::OversizeMessage {
                        size,
                        limit: self.max_event_size_bytes,
                    });
                }
            }
        }
        Ok(())
    }

    fn add_to_stack(&self, batches: &mut VecDeque<Batch>, timestamp: i64, message: String) {
        // The service rejects empty events.
        if message.is_empty() {
            return;
        }
        let event = EncodedEvent { timestamp, message };
        match batches.back_mut() {
            Some(last)
                if last.len() < self.max_batch_events
                    && last.size_bytes + event.message.len() <= self.max_batch_size_bytes =>
            {
                last.push(event);
            }
            _ => batches.push_back(Batch::with_event(event)),
        }
    }
}

/// Removes bytes around the midpoint so the result, marker included, is
/// exactly `cap` bytes. Cuts are widened to character boundaries.
fn truncate_middle(message: &str, cap: usize) -> String {
    let len = message.len();
    let excess = len - cap + TRUNCATION_MARKER.len();
    let mid = len / 2;
    let left_cut = excess.div_ceil(2);

    let mut head_end = mid - left_cut;
    let mut tail_start = mid + (excess - left_cut);
    while !message.is_char_boundary(head_end) {
        head_end -= 1;
    }
    while !message.is_char_boundary(tail_start) {
        tail_start += 1;
    }

    let mut truncated = String::with_capacity(cap);
    truncated.push_str(&message[..head_end]);
    truncated.push_str(TRUNCATION_MARKER);
    truncated.push_str(&message[tail_start..]);
    truncated
}

/// Slices `message` into consecutive pieces of at most `cap` bytes.
fn split_chunks(message: &str, cap: usize) -> Vec<&str> {
    let mut chunks = Vec::with_capacity(message.len().div_ceil(cap));
    let mut rest = message;
    while rest.len() > cap {
        let mut end = cap;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TS: i64 = 1_700_000_000_000;

    fn messages(batcher: &LogBatcher) -> Vec<String> {
        batcher
            .queue()
            .snapshot()
            .iter()
            .flat_map(|b| b.events().iter().map(|e| e.message.clone()))
            .collect()
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "truncate".parse::<OversizePolicy>().unwrap(),
            OversizePolicy::Truncate
        );
        assert_eq!(" Split ".parse::<OversizePolicy>().unwrap(), OversizePolicy::Split);
        assert_eq!("IGNORE".parse::<OversizePolicy>().unwrap(), OversizePolicy::Ignore);
        assert_eq!("error".parse::<OversizePolicy>().unwrap(), OversizePolicy::Error);
        assert_eq!(
            "drop".parse::<OversizePolicy>(),
            Err(ConfigError::UnknownOversizePolicy("drop".to_string()))
        );
        assert_eq!(OversizePolicy::default(), OversizePolicy::Truncate);
        assert_eq!(OversizePolicy::Split.to_string(), "split");
    }

    #[test]
    fn test_policy_serde() {
        let policy: OversizePolicy = serde_json::from_str("\"ignore\"").unwrap();
        assert_eq!(policy, OversizePolicy::Ignore);
        assert_eq!(
            serde_json::to_string(&OversizePolicy::Truncate).unwrap(),
            "\"truncate\""
        );
    }

    #[test]
    fn test_add_logs_shares_timestamp_and_order() {
        let batcher = LogBatcher::new(OversizePolicy::Truncate);
        batcher.add_logs(["a", "b", "c"], TS).unwrap();

        let batches = batcher.queue().snapshot();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0].size_bytes(), 3);
        assert!(batches[0].events().iter().all(|e| e.timestamp == TS));
        assert_eq!(messages(&batcher), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_messages_are_skipped() {
        let batcher = LogBatcher::new(OversizePolicy::Truncate);
        batcher.add_logs(["", "a", ""], TS).unwrap();
        assert_eq!(messages(&batcher), vec!["a"]);

        let empty = LogBatcher::new(OversizePolicy::Truncate);
        empty.add_logs(Vec::<String>::new(), TS).unwrap();
        assert!(empty.queue().is_empty());
    }

    #[test]
    fn test_batch_sealed_by_event_count() {
        let batcher = LogBatcher::with_limits(OversizePolicy::Truncate, 100, 1000, 2);
        batcher.add_logs(["1", "2", "3", "4", "5"], TS).unwrap();

        let sizes: Vec<usize> = batcher.queue().snapshot().iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_batch_sealed_by_byte_size() {
        let batcher = LogBatcher::with_limits(OversizePolicy::Truncate, 10, 10, 100);
        batcher.add_logs(["aaaa", "bbbb", "cc", "d"], TS).unwrap();

        let batches = batcher.queue().snapshot();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].size_bytes(), 10);
        assert_eq!(batches[1].size_bytes(), 1);
    }

    #[test]
    fn test_add_logs_appends_to_existing_batch() {
        let batcher = LogBatcher::new(OversizePolicy::Truncate);
        batcher.add_logs(["first"], TS).unwrap();
        batcher.add_logs(["second"], TS + 1).unwrap();

        let batches = batcher.queue().snapshot();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].events()[1].timestamp, TS + 1);
    }

    #[test]
    fn test_truncate_service_limit() {
        let batcher = LogBatcher::new(OversizePolicy::Truncate);
        let message = "x".repeat(150_000) + &"y".repeat(150_000);
        batcher.add_logs([message], TS).unwrap();

        let events = messages(&batcher);
        assert_eq!(events.len(), 1);
        let truncated = &events[0];
        assert_eq!(truncated.len(), constants::MAX_EVENT_SIZE_BYTES);
        let marker_at = truncated.find(TRUNCATION_MARKER).unwrap();
        // The marker replaces the middle: x's before it, y's after it.
        assert!(truncated[..marker_at].chars().all(|c| c == 'x'));
        assert!(truncated[marker_at + 3..].chars().all(|c| c == 'y'));
        let removed = 300_000 - constants::MAX_EVENT_SIZE_BYTES + 3;
        assert_eq!(marker_at, 150_000 - removed.div_ceil(2));
    }

    #[test]
    fn test_truncate_odd_excess() {
        // excess = 5: three bytes go left of the midpoint, two right of it
        assert_eq!(truncate_middle("abcdefghij", 8), "ab...hij");
        // excess = 6
        assert_eq!(truncate_middle("abcdefghijk", 8), "ab...ijk");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let message = "é".repeat(10);
        let truncated = truncate_middle(&message, 9);
        assert!(truncated.len() <= 9);
        assert!(truncated.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_split_policy() {
        let batcher = LogBatcher::with_limits(OversizePolicy::Split, 4, 1000, 100);
        batcher.add_logs(["abcdefghij"], TS).unwrap();
        assert_eq!(messages(&batcher), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_split_exact_multiple() {
        let batcher = LogBatcher::with_limits(OversizePolicy::Split, 4, 1000, 100);
        batcher.add_logs(["abcdefgh"], TS).unwrap();
        assert_eq!(messages(&batcher), vec!["abcd", "efgh"]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let chunks = split_chunks("ééééé", 5);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_ignore_policy() {
        let batcher = LogBatcher::with_limits(OversizePolicy::Ignore, 4, 1000, 100);
        batcher.add_logs(["ok", "too long", "fine"], TS).unwrap();
        assert_eq!(messages(&batcher), vec!["ok", "fine"]);
    }

    #[test]
    fn test_error_policy_keeps_partial_progress() {
        let batcher = LogBatcher::with_limits(OversizePolicy::Error, 4, 1000, 100);
        let result = batcher.add_logs(["ok", "too long", "never"], TS);

        match result {
            Err(CloudWatchError::OversizeMessage { size, limit }) => {
                assert_eq!(size, 8);
                assert_eq!(limit, 4);
            }
            other => panic!("expected OversizeMessage, got {other:?}"),
        }
        assert_eq!(messages(&batcher), vec!["ok"]);
    }

    #[test]
    fn test_pop_then_prepend_restores_queue() {
        let batcher = LogBatcher::with_limits(OversizePolicy::Truncate, 100, 1000, 1);
        batcher.add_logs(["a", "b", "c"], TS).unwrap();
        let before = batcher.queue().snapshot();

        let head = batcher.queue().pop().unwrap();
        assert_eq!(batcher.queue().len(), 2);
        batcher.queue().prepend(head);

        assert_eq!(batcher.queue().snapshot(), before);
    }

    #[test]
    fn test_pop_empty_queue() {
        let queue = BatchQueue::default();
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn prop_batches_respect_limits_and_preserve_order(
            input in prop::collection::vec("[a-z]{0,40}", 0..200),
            max_event in 4usize..32,
            max_bytes in 32usize..128,
            max_events in 1usize..16,
        ) {
            let batcher =
                LogBatcher::with_limits(OversizePolicy::Split, max_event, max_bytes, max_events);
            batcher.add_logs(&input, TS).unwrap();

            let batches = batcher.queue().snapshot();
            for batch in &batches {
                prop_assert!(!batch.is_empty());
                prop_assert!(batch.len() <= max_events);
                prop_assert!(batch.size_bytes() <= max_bytes);
                let summed: usize = batch.events().iter().map(|e| e.message.len()).sum();
                prop_assert_eq!(summed, batch.size_bytes());
                for event in batch.events() {
                    prop_assert!(event.message.len() <= max_event);
                }
            }

            // Split is lossless: concatenating all events rebuilds the input.
            let shipped: String = batches
                .iter()
                .flat_map(|b| b.events().iter().map(|e| e.message.as_str()))
                .collect();
            prop_assert_eq!(shipped, input.concat());
        }

        #[test]
        fn prop_split_event_count(len in 33usize..400) {
            let batcher = LogBatcher::with_limits(OversizePolicy::Split, 32, 10_000, 1000);
            batcher.add_logs(["z".repeat(len)], TS).unwrap();
            prop_assert_eq!(messages(&batcher).len(), len.div_ceil(32));
        }

        #[test]
        fn prop_truncate_exact_length(len in 33usize..400) {
            let batcher = LogBatcher::with_limits(OversizePolicy::Truncate, 32, 10_000, 1000);
            batcher.add_logs(["q".repeat(len)], TS).unwrap();
            let events = messages(&batcher);
            prop_assert_eq!(events.len(), 1);
            prop_assert_eq!(events[0].len(), 32);
            prop_assert!(events[0].contains(TRUNCATION_MARKER));
        }
    }
}
