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

//! Broker bootstrap
//!
//! Start-up order:
//! 1. Open the metadata store (the only fatal step)
//! 2. Create each virtual host and declare its system exchanges
//! 3. Recover persisted exchanges and bindings
//!
//! Only after `start` returns may connections be accepted.

use std::{collections::HashMap, sync::Arc};

use anvil_exchange::{RecoveryCoordinator, VirtualHost};
use anvil_storage::StorageEngine;
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::BrokerConfig;

pub struct Broker {
	storage: Arc<StorageEngine>,
	vhosts: HashMap<String, Arc<VirtualHost>>,
}

impl Broker {
	pub fn start(config: BrokerConfig) -> Result<Self> {
		info!(
			target: "server",
			data_dir = %config.data_dir.display(),
			compaction_interval_secs = config.compaction_interval_secs,
			"Opening metadata store..."
		);
		let storage = StorageEngine::open(&config.data_dir, config.storage_config())
			.with_context(|| {
				format!(
					"Failed to open metadata store at {}",
					config.data_dir.display()
				)
			})?;
		let storage = Arc::new(storage);

		if config.virtual_hosts.is_empty() {
			warn!(target: "server", "No virtual hosts configured");
		}

		let coordinator = RecoveryCoordinator::new(storage.clone());
		let mut vhosts = HashMap::new();

		for name in &config.virtual_hosts {
			let vhost = Arc::new(VirtualHost::new(name.clone(), storage.clone()));
			vhost.declare_system_exchanges();

			let report = coordinator
				.recover(&vhost)
				.with_context(|| format!("Failed to recover virtual host '{}'", name))?;
			info!(
				target: "server",
				vhost = %name,
				exchanges = report.exchanges,
				bindings = report.bindings,
				"Virtual host ready"
			);

			vhosts.insert(name.clone(), vhost);
		}

		Ok(Self { storage, vhosts })
	}

	pub fn vhost(&self, name: &str) -> Option<Arc<VirtualHost>> {
		self.vhosts.get(name).cloned()
	}

	pub fn vhost_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.vhosts.keys().cloned().collect();
		names.sort();
		names
	}

	pub fn storage(&self) -> &Arc<StorageEngine> {
		&self.storage
	}

	/// Stop the compactor and flush the metadata store
	pub fn shutdown(&self) -> Result<()> {
		info!(target: "server", "Closing metadata store...");
		self.storage
			.close()
			.context("Failed to close metadata store")
	}
}
