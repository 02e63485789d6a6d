// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scripted transport standing in for the service

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cloudwatch_logs::config::Config;
use cloudwatch_logs::credentials::{Credentials, CredentialsFactory};
use cloudwatch_logs::delivery::DeliveryEngine;
use cloudwatch_logs::destination::Destination;
use cloudwatch_logs::transport::{Operation, Transport, TransportError, TransportResponse};
use serde_json::{json, Value};
use tokio::sync::watch;

/// What the mock answers to one request.
pub enum Reply {
    Response(u16, Value),
    NoResponse,
    Error(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Response(200, json!({}))
    }

    pub fn accepted(next_token: &str) -> Self {
        Reply::Response(200, json!({ "nextSequenceToken": next_token }))
    }

    pub fn error(kind: &str, message: &str) -> Self {
        Reply::Response(400, json!({ "__type": kind, "message": message }))
    }
}

/// Records every request and answers from a per-operation script.
///
/// Once an operation's script is exhausted it answers 200 with an empty
/// JSON object.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<Vec<(Operation, VecDeque<Reply>)>>,
    calls: Mutex<Vec<(Operation, Value)>>,
    latency: Option<Duration>,
    gate: Option<(String, watch::Receiver<bool>)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every answer, so concurrent callers overlap.
    pub fn with_latency(latency: Duration) -> Self {
        MockTransport {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Holds every request for `group` until `true` is sent on the returned
    /// channel. Other groups are answered right away.
    pub fn gated(group: &str) -> (Self, watch::Sender<bool>) {
        let (open_tx, open_rx) = watch::channel(false);
        let transport = MockTransport {
            gate: Some((group.to_string(), open_rx)),
            ..Self::default()
        };
        (transport, open_tx)
    }

    pub fn script(&self, operation: Operation, reply: Reply) -> &Self {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.iter_mut().find(|(op, _)| *op == operation) {
            Some((_, replies)) => replies.push_back(reply),
            None => scripts.push((operation, VecDeque::from([reply]))),
        }
        self
    }

    pub fn calls(&self) -> Vec<(Operation, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.calls().into_iter().map(|(op, _)| op).collect()
    }

    /// Bodies of every `PutLogEvents` request, in order.
    pub fn puts(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(op, _)| *op == Operation::PutLogEvents)
            .map(|(_, body)| body)
            .collect()
    }

    fn next_reply(&self, operation: Operation) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .iter_mut()
            .find(|(op, _)| *op == operation)
            .and_then(|(_, replies)| replies.pop_front())
            .unwrap_or_else(Reply::ok)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        operation: Operation,
        body: Value,
    ) -> Result<Option<TransportResponse>, TransportError> {
        let group = body["logGroupName"].as_str().map(str::to_string);
        self.calls.lock().unwrap().push((operation, body));
        if let Some((gated_group, open)) = &self.gate {
            if group.as_deref() == Some(gated_group.as_str()) {
                let mut open = open.clone();
                open.wait_for(|open| *open)
                    .await
                    .map_err(|e| TransportError::Signing(e.to_string()))?;
            }
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.next_reply(operation) {
            Reply::Response(status, body) => {
                Ok(Some(TransportResponse::new(status, body.to_string())))
            }
            Reply::NoResponse => Ok(None),
            Reply::Error(message) => Err(TransportError::Signing(message)),
        }
    }
}

pub fn test_config() -> Config {
    Config::new(
        CredentialsFactory::new_from_static(Credentials::new("AKIDTEST", "secret")),
        "us-east-1",
    )
    .expect("failed to create config")
}

pub fn engine(transport: Arc<MockTransport>, config: &Config) -> DeliveryEngine {
    DeliveryEngine::new(Destination::new("app", "web"), config, transport)
}

/// `(timestamp, message)` pairs of one `PutLogEvents` body.
pub fn events(body: &Value) -> Vec<(i64, String)> {
    body["logEvents"]
        .as_array()
        .expect("logEvents is an array")
        .iter()
        .map(|event| {
            (
                event["timestamp"].as_i64().expect("timestamp"),
                event["message"].as_str().expect("message").to_string(),
            )
        })
        .collect()
}
