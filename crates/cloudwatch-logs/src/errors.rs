// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced by the client.

use crate::transport::{Operation, TransportError};
use thiserror::Error;

/// Errors returned to callers of [`crate::delivery::DeliveryEngine::log_many`].
///
/// Every variant except [`CloudWatchError::InvalidDestination`] leaves the
/// affected batches at the head of the engine's queue so that a later call
/// can deliver them.
#[derive(Debug, Error)]
pub enum CloudWatchError {
    /// The (group, stream) pair failed pre-flight validation.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    /// A message exceeded the per-event cap under the `error` oversize policy.
    #[error("log message of {size} bytes exceeds the {limit} byte event limit")]
    OversizeMessage { size: usize, limit: usize },
    /// The transport failed before the service produced a response.
    #[error("{operation} failed: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: TransportError,
    },
    /// The service answered with a response that could not be repaired.
    #[error("{operation} failed with status {status}: {body}")]
    Service {
        operation: Operation,
        status: u16,
        body: String,
    },
    /// The transport returned no response at all.
    #[error("{operation} returned no response")]
    NoResponse { operation: Operation },
}

/// Errors raised while building a [`crate::config::Config`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("unknown large message behavior '{0}', expected one of truncate, split, ignore, error")]
    UnknownOversizePolicy(String),
}
