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

//! Topology recovery
//!
//! Rebuilds a virtual host's durable exchanges and bindings from the
//! metadata store before the broker accepts connections. Recovery runs in
//! two phases over a single scan:
//!
//! 1. Register every exchange record of the vhost
//! 2. Attach every binding record whose exchange is now registered
//!
//! Records that fail to decode, or bindings whose exchange is gone, are
//! skipped and logged; they never abort start-up.

use std::sync::Arc;

use anvil_storage::{Storage, StorageError};
use thiserror::Error;
use tracing::{info, warn};

use crate::{binding::Binding, exchange::Exchange, kind::ExchangeKind, vhost::VirtualHost};

/// Error types for recovery
#[derive(Debug, Error)]
pub enum RecoveryError {
	#[error("Failed to scan metadata store: {0}")]
	Storage(#[from] StorageError),
}

/// Counts from one recovery run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
	pub exchanges: usize,
	pub bindings: usize,
	pub skipped: usize,
}

/// Topology recovery coordinator
pub struct RecoveryCoordinator {
	storage: Arc<dyn Storage>,
}

impl RecoveryCoordinator {
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	/// Restore the persisted topology of `vhost`
	///
	/// System exchanges should already be declared; a record that collides
	/// with a registered name is skipped.
	pub fn recover(&self, vhost: &VirtualHost) -> Result<RecoveryReport, RecoveryError> {
		info!(target: "recovery", vhost = %vhost.name(), "Starting topology recovery...");

		let exchange_prefix = vhost.exchange_key_prefix();
		let binding_prefix = vhost.binding_key_prefix();

		let mut exchange_records: Vec<(String, Vec<u8>)> = Vec::new();
		let mut binding_records: Vec<(String, Vec<u8>)> = Vec::new();

		self.storage.iterate_all(&mut |key: &str, value: &[u8]| {
			if key.starts_with(&exchange_prefix) {
				exchange_records.push((key.to_string(), value.to_vec()));
			} else if key.starts_with(&binding_prefix) {
				binding_records.push((key.to_string(), value.to_vec()));
			}
			true
		})?;

		let mut report = RecoveryReport::default();

		// Phase 1: exchanges
		for (key, record) in exchange_records {
			let exchange = match Exchange::decode(&record) {
				Ok(exchange) => exchange,
				Err(e) => {
					warn!(target: "recovery", key = %key, "Skipping undecodable exchange record: {}", e);
					report.skipped += 1;
					continue;
				}
			};

			if vhost.exchange_key(exchange.name()) != key {
				warn!(
					target: "recovery",
					key = %key,
					exchange = %exchange.name(),
					"Exchange record stored under a foreign key, skipped"
				);
				report.skipped += 1;
				continue;
			}

			if let ExchangeKind::Unknown(byte) = exchange.kind() {
				warn!(
					target: "recovery",
					exchange = %exchange.name(),
					kind = byte,
					"Exchange has an unknown kind and will route nothing"
				);
			}

			let name = exchange.name().to_string();
			if vhost.restore_exchange(exchange) {
				report.exchanges += 1;
			} else {
				warn!(target: "recovery", exchange = %name, "Exchange already registered, record skipped");
				report.skipped += 1;
			}
		}

		// Phase 2: bindings
		for (key, record) in binding_records {
			let binding = match Binding::decode(&record, |name| vhost.exchange(name).map(|e| e.kind())) {
				Ok(binding) => binding,
				Err(e) => {
					warn!(target: "recovery", key = %key, "Skipping binding record: {}", e);
					report.skipped += 1;
					continue;
				}
			};

			if let Some(exchange) = vhost.exchange(binding.exchange())
				&& exchange.add_binding(binding)
			{
				report.bindings += 1;
			}
		}

		info!(
			target: "recovery",
			vhost = %vhost.name(),
			exchanges = report.exchanges,
			bindings = report.bindings,
			skipped = report.skipped,
			"Topology recovery complete"
		);
		Ok(report)
	}
}
