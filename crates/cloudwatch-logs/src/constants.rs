// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hard limits enforced by the CloudWatch Logs `PutLogEvents` API.
//!
//! The service accounts 26 bytes of overhead per event on top of the UTF-8
//! message length. Both byte limits below already have that overhead taken
//! out, so batches only need to sum raw message lengths.

/// Maximum UTF-8 byte length of a single event message (256 KiB minus the
/// 26 bytes of per-event overhead).
pub const MAX_EVENT_SIZE_BYTES: usize = 262_118;

/// Maximum cumulative UTF-8 byte length of all messages in one batch.
///
/// Distinct from [`MAX_EVENT_SIZE_BYTES`]: this is the 1 MiB request cap
/// minus the overhead the service counts for the batch itself.
pub const MAX_BATCH_SIZE_BYTES: usize = 1_048_550;

/// Maximum number of events in one batch.
pub const MAX_BATCH_EVENTS: usize = 10_000;

/// Marker inserted where `truncate` removes bytes from an oversized message.
pub const TRUNCATION_MARKER: &str = "...";

/// Maximum length of a log group or log stream name.
pub const MAX_NAME_LENGTH: usize = 512;

/// JSON protocol version prefix used in the `X-Amz-Target` header.
pub const TARGET_PREFIX: &str = "Logs_20140328";

/// Signing name of the service.
pub const SERVICE_NAME: &str = "logs";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RETRIES: u32 = 3;
