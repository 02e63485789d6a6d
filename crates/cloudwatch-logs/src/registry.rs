// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide lookup of delivery engines by destination.
//!
//! Build one [`Registry`] at startup and share it. Engines are created on
//! first use and never removed, so every caller targeting the same
//! (group, stream) pair shares one queue, one sequence token and one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::Config;
use crate::delivery::DeliveryEngine;
use crate::destination::Destination;
use crate::http::HttpTransport;
use crate::transport::{Transport, TransportError};

pub struct Registry {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    engines: Mutex<HashMap<Destination, Arc<DeliveryEngine>>>,
}

impl Registry {
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>) -> Self {
        Registry {
            config,
            transport,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Registry backed by the signed HTTP transport.
    pub fn from_config(config: Arc<Config>) -> Result<Self, TransportError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::new(config, transport))
    }

    /// Returns the engine for (group, stream), creating it if needed.
    pub fn engine(&self, group: &str, stream: &str) -> Arc<DeliveryEngine> {
        let destination = Destination::new(group, stream);
        #[allow(clippy::expect_used)]
        let mut engines = self.engines.lock().expect("lock poisoned");
        Arc::clone(engines.entry(destination).or_insert_with_key(|destination| {
            debug!("CLOUDWATCH | Creating delivery engine for {destination}");
            Arc::new(DeliveryEngine::new(
                destination.clone(),
                &self.config,
                Arc::clone(&self.transport),
            ))
        }))
    }

    /// Returns the engine for (group, stream) if one was created.
    pub fn get(&self, group: &str, stream: &str) -> Option<Arc<DeliveryEngine>> {
        #[allow(clippy::expect_used)]
        let engines = self.engines.lock().expect("lock poisoned");
        engines.get(&Destination::new(group, stream)).cloned()
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let engines = self.engines.lock().expect("lock poisoned");
        engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
