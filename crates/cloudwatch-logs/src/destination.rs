// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identity of one append-only log target.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::constants::MAX_NAME_LENGTH;
use crate::errors::CloudWatchError;

#[allow(clippy::expect_used)]
fn group_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[.\-_/#A-Za-z0-9]+$").expect("valid group name regex"))
}

/// A (log group, log stream) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    group: String,
    stream: String,
}

impl Destination {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Checks the names against the service's naming rules.
    ///
    /// Lengths are counted in characters, not bytes.
    pub fn validate(&self) -> Result<(), CloudWatchError> {
        check_length("log group", &self.group)?;
        check_length("log stream", &self.stream)?;
        if !group_name_pattern().is_match(&self.group) {
            return Err(CloudWatchError::InvalidDestination(format!(
                "log group name '{}' may only contain letters, digits and . - _ / #",
                self.group
            )));
        }
        if self.stream.contains([':', '*']) {
            return Err(CloudWatchError::InvalidDestination(format!(
                "log stream name '{}' may not contain ':' or '*'",
                self.stream
            )));
        }
        Ok(())
    }
}

fn check_length(kind: &str, name: &str) -> Result<(), CloudWatchError> {
    if name.is_empty() {
        return Err(CloudWatchError::InvalidDestination(format!(
            "{kind} name must not be empty"
        )));
    }
    let chars = name.chars().count();
    if chars > MAX_NAME_LENGTH {
        return Err(CloudWatchError::InvalidDestination(format!(
            "{kind} name is {chars} characters long, the limit is {MAX_NAME_LENGTH}"
        )));
    }
    Ok(())
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.stream)
    }
}
