// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::{
    io::{stdin, AsyncBufReadExt, BufReader},
    sync::mpsc,
    time::{interval, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cloudwatch_logs::{config::Config, delivery::DeliveryEngine, registry::Registry};

const DEFAULT_FLUSH_INTERVAL: u64 = 5;
const LINE_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("CLOUDWATCH_LOGS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);
    let env_filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to install log subscriber: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Error loading config: {e}. Shutting down shipper.");
            return;
        }
    };

    let (Some(group), Some(stream)) = (
        non_empty_var("CLOUDWATCH_LOGS_GROUP"),
        non_empty_var("CLOUDWATCH_LOGS_STREAM"),
    ) else {
        error!(
            "CLOUDWATCH_LOGS_GROUP and CLOUDWATCH_LOGS_STREAM must be set. Shutting down shipper."
        );
        return;
    };

    let flush_interval_secs = match non_empty_var("CLOUDWATCH_LOGS_FLUSH_INTERVAL_SECS") {
        Some(value) => value.parse::<u64>().unwrap_or_else(|_| {
            error!("Invalid flush interval '{value}', using {DEFAULT_FLUSH_INTERVAL}s");
            DEFAULT_FLUSH_INTERVAL
        }),
        None => DEFAULT_FLUSH_INTERVAL,
    }
    .max(1);

    let registry = match Registry::from_config(config) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Error creating transport: {e}. Shutting down shipper.");
            return;
        }
    };
    let engine = registry.engine(&group, &stream);

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, flushing before exit");
            ctrl_c_token.cancel();
        }
    });

    let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
    tokio::spawn(read_lines(line_tx));

    info!("Shipping stdin to {group}:{stream} every {flush_interval_secs}s");

    let mut buffer: Vec<String> = Vec::new();
    let mut flush_interval = interval(Duration::from_secs(flush_interval_secs));
    flush_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            _ = flush_interval.tick() => {
                ship(&engine, &mut buffer).await;
            }
            line = line_rx.recv() => match line {
                Some(line) => buffer.push(line),
                None => {
                    debug!("Reached end of input");
                    break;
                }
            },
            _ = cancel_token.cancelled() => break,
        }
    }

    ship(&engine, &mut buffer).await;
    if engine.pending_batches() > 0 {
        error!(
            "Exiting with {} undelivered batches",
            engine.pending_batches()
        );
    }
}

async fn read_lines(line_tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line_tx.send(line).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                error!("Error reading stdin: {e}");
                return;
            }
        }
    }
}

/// Ships buffered lines, or retries batches kept by an earlier failure.
async fn ship(engine: &DeliveryEngine, buffer: &mut Vec<String>) {
    let result = if buffer.is_empty() {
        if engine.pending_batches() == 0 {
            return;
        }
        engine.flush().await
    } else {
        debug!("Shipping {} lines", buffer.len());
        engine.log_many(buffer.drain(..)).await
    };
    if let Err(e) = result {
        error!("Failed to ship logs to {}: {e}", engine.destination());
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
