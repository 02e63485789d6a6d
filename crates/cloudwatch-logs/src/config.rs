// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::batcher::OversizePolicy;
use crate::constants::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RETRIES};
use crate::credentials::{Credentials, CredentialsFactory};
use crate::errors::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: CredentialsFactory,
    pub region: String,
    /// pause before every send attempt
    pub delay: Duration,
    pub request_timeout: Duration,
    /// attempts per batch, never below 1
    pub retries: u32,
    pub large_message_behavior: OversizePolicy,
    /// overrides `https://logs.{region}.amazonaws.com`
    pub endpoint: Option<String>,
    pub proxy_url: Option<String>,
}

impl Config {
    pub fn new(
        credentials: CredentialsFactory,
        region: impl Into<String>,
    ) -> Result<Config, ConfigError> {
        let region = region.into();
        if region.trim().is_empty() {
            return Err(ConfigError::Missing("region"));
        }
        Ok(Config {
            credentials,
            region,
            delay: Duration::ZERO,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            large_message_behavior: OversizePolicy::default(),
            endpoint: None,
            proxy_url: None,
        })
    }

    pub fn from_env() -> Result<Config, ConfigError> {
        let access_key_id = non_empty_var("AWS_ACCESS_KEY_ID")
            .ok_or(ConfigError::Missing("AWS_ACCESS_KEY_ID"))?;
        let secret_access_key = non_empty_var("AWS_SECRET_ACCESS_KEY")
            .ok_or(ConfigError::Missing("AWS_SECRET_ACCESS_KEY"))?;
        let mut credentials = Credentials::new(access_key_id, secret_access_key);
        if let Some(token) = non_empty_var("AWS_SESSION_TOKEN") {
            credentials = credentials.with_session_token(token);
        }

        let region = non_empty_var("AWS_REGION")
            .or_else(|| non_empty_var("AWS_DEFAULT_REGION"))
            .ok_or(ConfigError::Missing("AWS_REGION"))?;

        let mut config = Config::new(CredentialsFactory::new_from_static(credentials), region)?;

        if let Some(delay_ms) = parsed_var::<u64>("CLOUDWATCH_LOGS_DELAY_MS") {
            config.delay = Duration::from_millis(delay_ms);
        }
        if let Some(timeout_secs) = parsed_var::<u64>("CLOUDWATCH_LOGS_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(timeout_secs);
        }
        if let Some(retries) = parsed_var::<u32>("CLOUDWATCH_LOGS_RETRIES") {
            config.retries = retries;
        }
        if let Some(behavior) = non_empty_var("CLOUDWATCH_LOGS_LARGE_MESSAGE_BEHAVIOR") {
            config.large_message_behavior = behavior.parse()?;
        }
        config.endpoint = non_empty_var("CLOUDWATCH_LOGS_ENDPOINT");
        config.proxy_url = non_empty_var("HTTPS_PROXY");

        Ok(config)
    }

    /// Configured retries with the floor of one attempt applied.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    #[must_use]
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://logs.{}.amazonaws.com", self.region),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    let value = non_empty_var(name)?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid value '{value}' for {name}, using the default");
            None
        }
    }
}
