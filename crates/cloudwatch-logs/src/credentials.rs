// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::sync::Arc;
use std::{future::Future, pin::Pin};
use tokio::sync::OnceCell;

/// Access key pair used to sign requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    #[must_use]
    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }
}

// Secrets stay out of logs.
impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub type CredentialsResolverFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Credentials> + Send>> + Send + Sync>;

/// Source of [`Credentials`], either fixed or resolved once on first use.
#[derive(Clone)]
pub enum CredentialsFactory {
    Static(Credentials),
    Dynamic {
        resolver_fn: CredentialsResolverFn,
        credentials: Arc<OnceCell<Credentials>>,
    },
}

impl CredentialsFactory {
    pub fn new_from_resolver(resolver_fn: CredentialsResolverFn) -> Self {
        Self::Dynamic {
            resolver_fn,
            credentials: Arc::new(OnceCell::new()),
        }
    }

    pub fn new_from_static(credentials: Credentials) -> Self {
        Self::Static(credentials)
    }

    pub async fn get_credentials(&self) -> &Credentials {
        match self {
            Self::Static(credentials) => credentials,
            Self::Dynamic {
                resolver_fn,
                credentials,
            } => {
                credentials
                    .get_or_init(|| async { (resolver_fn)().await })
                    .await
            }
        }
    }
}

impl Debug for CredentialsFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialsFactory")
    }
}
