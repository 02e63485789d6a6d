// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport speaking the CloudWatch Logs JSON 1.1 protocol.
//!
//! Every request is a signed `POST /` whose `X-Amz-Target` header names the
//! operation. The response status and raw body are handed back untouched;
//! interpreting them is the classifier's job.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Url;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::Config;
use crate::constants::SERVICE_NAME;
use crate::credentials::CredentialsFactory;
use crate::sigv4::{self, SigningRequest};
use crate::transport::{Operation, Transport, TransportError, TransportResponse};

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Builds a reqwest client with optional proxy configuration and timeout.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    /// `host[:port]` exactly as reqwest will send it
    host: String,
    region: String,
    credentials: CredentialsFactory,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let endpoint = config.endpoint_url();
        let url = Url::parse(&endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("'{endpoint}': {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "'{endpoint}' has no host"
                )))
            }
        };
        let client = build_client(config.proxy_url.as_deref(), config.request_timeout)?;

        Ok(Self {
            client,
            url,
            host,
            region: config.region.clone(),
            credentials: config.credentials.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        operation: Operation,
        body: serde_json::Value,
    ) -> Result<Option<TransportResponse>, TransportError> {
        let payload =
            serde_json::to_vec(&body).map_err(|e| TransportError::Signing(e.to_string()))?;
        let now = OffsetDateTime::now_utc();
        let credentials = self.credentials.get_credentials().await;

        let mut headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("host".to_string(), self.host.clone()),
            ("x-amz-date".to_string(), sigv4::amz_date(now)?),
            ("x-amz-target".to_string(), operation.target()),
        ];
        if let Some(token) = &credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let signing_request = SigningRequest {
            method: "POST",
            path: self.url.path(),
            headers,
            payload: &payload,
        };
        let authorization = sigv4::authorization(
            &signing_request,
            credentials,
            &self.region,
            SERVICE_NAME,
            now,
        )?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header(AUTHORIZATION, authorization);
        // reqwest derives Host from the URL
        for (name, value) in signing_request.headers {
            if name != "host" {
                request = request.header(name, value);
            }
        }

        let time = Instant::now();
        let response = request.body(payload).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(
            "CLOUDWATCH | {operation} answered {status} in {} ms",
            time.elapsed().as_millis()
        );

        Ok(Some(TransportResponse { status, body }))
    }
}
