// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reliable log shipping to CloudWatch Logs streams.
//!
//! Messages handed to a [`delivery::DeliveryEngine`] are packed into batches
//! that respect the service's event, byte and count limits
//! ([`batcher`]), then delivered oldest first under a per-destination lock.
//! Known transient service errors (stale sequence token, missing stream or
//! group, duplicate submission) are repaired in place ([`classifier`]);
//! anything else is retried a bounded number of times and then returned to
//! the caller with the batch kept at the head of the queue.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cloudwatch_logs::{config::Config, registry::Registry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(Config::from_env()?);
//! let registry = Registry::from_config(config)?;
//! registry
//!     .engine("my-app", "web-1")
//!     .log_many(["started", "listening on :8080"])
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod delivery;
pub mod destination;
pub mod errors;
pub mod http;
pub mod registry;
pub mod sigv4;
pub mod transport;
