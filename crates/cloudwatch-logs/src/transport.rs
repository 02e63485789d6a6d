// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Boundary between the delivery engine and whatever carries requests to the service.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::constants::TARGET_PREFIX;

/// The three service operations the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateLogGroup,
    CreateLogStream,
    PutLogEvents,
}

impl Operation {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Operation::CreateLogGroup => "CreateLogGroup",
            Operation::CreateLogStream => "CreateLogStream",
            Operation::PutLogEvents => "PutLogEvents",
        }
    }

    /// Value of the `X-Amz-Target` header for this operation.
    #[must_use]
    pub fn target(self) -> String {
        format!("{TARGET_PREFIX}.{}", self.name())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw status and body as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Network, TLS or timeout failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The request could not be signed.
    #[error("signing failed: {0}")]
    Signing(String),
    /// The configured endpoint is not a usable URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Carries one logical operation to the service.
///
/// `Ok(None)` means the request went out but nothing came back; the engine
/// treats it as a fatal response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        operation: Operation,
        body: serde_json::Value,
    ) -> Result<Option<TransportResponse>, TransportError>;
}
