// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Robotap Application

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use robotap::bluetooth::{BluezConnector, LinkManager, LinkState};
use robotap::config::Config;
use robotap::events::EventProcessor;
use robotap::plan::{BatchFeeder, Plan};
use robotap::state::{AppState, ConnectionStatus};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("robotap=info".parse()?))
        .init();

    info!("Starting Robotap v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Create application state
    let state = AppState::new();

    let processor = match &config.plan.path {
        Some(path) => {
            let plan = Plan::load(path)?;
            let feeder = BatchFeeder::new(&plan, config.plan.phase, config.plan.batch_size);
            if feeder.is_empty() {
                warn!("Plan {} has no steps", path.display());
            }
            EventProcessor::with_plan(state.clone(), feeder)
        }
        None => EventProcessor::new(state.clone()),
    };
    let processor = Arc::new(processor);

    let connector = BluezConnector::new(&config.link.device_name, config.link.service_uuid);
    let (handle, manager) =
        LinkManager::spawn(connector, processor.clone(), config.link.retry_policy());

    info!("Connecting to '{}'...", config.link.device_name);
    handle.start();

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut first_batch = None;
    let mut plan_sent = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = handle.snapshot();
                let status = ConnectionStatus::from(snapshot.state);
                if state.get_status() != status {
                    info!("Link {}", status.as_str());
                    state.set_status(status);
                }

                match snapshot.state {
                    LinkState::Connected if !plan_sent => {
                        let batch = first_batch.get_or_insert_with(|| processor.first_batch());
                        if batch.is_empty() {
                            plan_sent = true;
                        } else {
                            match handle.send_all(batch).await {
                                Ok(()) => plan_sent = true,
                                Err(e) => warn!("Failed to send first batch: {}", e),
                            }
                        }
                    }
                    LinkState::Failed => {
                        error!(
                            "Giving up on '{}': {}",
                            config.link.device_name,
                            state.get_last_status().unwrap_or_default()
                        );
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    handle.shutdown();
    if let Err(e) = manager.await {
        error!("Link manager task failed: {}", e);
    }

    info!(
        "Robot last at {:?}, {} blocks found",
        state.get_robot(),
        state.block_count()
    );
    Ok(())
}
