// Copyright 2025 itscheems
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

//! Broker service entry point

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use anvil_broker::{Broker, BrokerConfig};

#[tokio::main]
async fn main() -> Result<()> {
	// Initialize logging first
	anvil_broker::logging::init_logging()?;

	let config = BrokerConfig::from_env().unwrap_or_else(|e| {
		warn!(target: "server", "Invalid configuration ({}), using defaults", e);
		BrokerConfig::default()
	});

	info!(target: "server", "Starting Anvil Broker");
	info!(target: "server", "Virtual hosts: {:?}", config.virtual_hosts);

	let broker = Broker::start(config).context("Broker start-up failed")?;
	info!(target: "server", "Broker ready");

	signal::ctrl_c()
		.await
		.context("Failed to listen for shutdown signal")?;

	info!(target: "server", "Shutting down...");
	broker.shutdown()?;

	info!(target: "server", "Shutdown complete");
	Ok(())
}
