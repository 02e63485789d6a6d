// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of service responses into accepted, repairable and fatal.
//!
//! The service reports errors as a JSON body carrying a discriminator
//! (`__type`) and a human readable `message`. A handful of those errors are
//! expected in normal operation and can be repaired in place:
//!
//! | discriminator                   | repair                                  |
//! |---------------------------------|-----------------------------------------|
//! | `InvalidSequenceTokenException` | adopt the expected token                |
//! | `ResourceNotFoundException`     | recreate the missing stream or group    |
//! | `DataAlreadyAcceptedException`  | none, the batch counts as delivered     |
//!
//! Everything else is fatal for the attempt.

use serde::Deserialize;
use tracing::warn;

use crate::transport::TransportResponse;

const INVALID_SEQUENCE_TOKEN: &str = "InvalidSequenceTokenException";
const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";
const DATA_ALREADY_ACCEPTED: &str = "DataAlreadyAcceptedException";
const RESOURCE_ALREADY_EXISTS: &str = "ResourceAlreadyExistsException";

const MISSING_STREAM_MESSAGE: &str = "The specified log stream does not exist.";
const MISSING_GROUP_MESSAGE: &str = "The specified log group does not exist.";

/// Outcome of a `PutLogEvents` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The batch is delivered; carries the token for the next write.
    Accepted(Option<String>),
    /// Repair local state and send the same batch again.
    RetryAfterRepair(RepairAction),
    /// The attempt failed and nothing can be repaired.
    Fatal(FatalReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    AdoptToken(Option<String>),
    RecreateStream,
    RecreateGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    NoResponse,
    Service { status: u16, body: String },
}

/// Outcome of a `CreateLogGroup` or `CreateLogStream` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationOutcome {
    Created,
    AlreadyExists,
    /// The parent group does not exist. Carries the response to surface if
    /// creating the group does not help.
    GroupMissing(FatalReason),
    Failed(FatalReason),
}

// Each spelling gets its own field: serde aliases reject bodies that carry both.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    code: Option<String>,
    message: Option<String>,
    #[serde(rename = "Message")]
    message_upper: Option<String>,
    #[serde(rename = "expectedSequenceToken")]
    expected_sequence_token: Option<String>,
}

impl ErrorBody {
    fn parse(response: &TransportResponse) -> Self {
        serde_json::from_slice(&response.body).unwrap_or_default()
    }

    /// Discriminator without the `namespace#` prefix some endpoints add.
    fn discriminator(&self) -> Option<&str> {
        self.kind
            .as_deref()
            .or(self.code.as_deref())
            .map(|kind| kind.rsplit_once('#').map_or(kind, |(_, name)| name))
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref().or(self.message_upper.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsBody {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectedLogEventsInfo {
    too_new_log_event_start_index: Option<i64>,
    too_old_log_event_end_index: Option<i64>,
    expired_log_event_end_index: Option<i64>,
}

fn fatal(response: &TransportResponse) -> FatalReason {
    FatalReason::Service {
        status: response.status,
        body: response.body_text(),
    }
}

/// Classifies a `PutLogEvents` response given the token that was sent.
#[must_use]
pub fn classify_put(
    response: Option<&TransportResponse>,
    current_token: Option<&str>,
) -> Classification {
    let Some(response) = response else {
        return Classification::Fatal(FatalReason::NoResponse);
    };

    if response.status == 200 {
        let body: PutLogEventsBody = serde_json::from_slice(&response.body).unwrap_or_default();
        if let Some(rejected) = body.rejected_log_events_info {
            warn!(
                "CLOUDWATCH | Service rejected some log events: too new from index {:?}, too old up to index {:?}, expired up to index {:?}",
                rejected.too_new_log_event_start_index,
                rejected.too_old_log_event_end_index,
                rejected.expired_log_event_end_index
            );
        }
        return Classification::Accepted(body.next_sequence_token);
    }

    let error = ErrorBody::parse(response);
    match error.discriminator() {
        Some(INVALID_SEQUENCE_TOKEN)
            if error.expected_sequence_token.as_deref() != current_token =>
        {
            Classification::RetryAfterRepair(RepairAction::AdoptToken(
                error.expected_sequence_token.clone(),
            ))
        }
        Some(RESOURCE_NOT_FOUND) => match error.message() {
            Some(MISSING_STREAM_MESSAGE) => {
                Classification::RetryAfterRepair(RepairAction::RecreateStream)
            }
            Some(MISSING_GROUP_MESSAGE) => {
                Classification::RetryAfterRepair(RepairAction::RecreateGroup)
            }
            _ => Classification::Fatal(fatal(response)),
        },
        Some(DATA_ALREADY_ACCEPTED) => {
            Classification::Accepted(error.expected_sequence_token.clone())
        }
        _ => Classification::Fatal(fatal(response)),
    }
}

/// Classifies a creation response.
#[must_use]
pub fn classify_creation(response: Option<&TransportResponse>) -> CreationOutcome {
    let Some(response) = response else {
        return CreationOutcome::Failed(FatalReason::NoResponse);
    };
    if response.status == 200 {
        return CreationOutcome::Created;
    }
    match ErrorBody::parse(response).discriminator() {
        Some(RESOURCE_ALREADY_EXISTS) => CreationOutcome::AlreadyExists,
        Some(RESOURCE_NOT_FOUND) => CreationOutcome::GroupMissing(fatal(response)),
        _ => CreationOutcome::Failed(fatal(response)),
    }
}
