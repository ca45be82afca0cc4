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

//! Virtual host
//!
//! Per-vhost exchange registry. It owns the declare/redeclare state
//! machine and keeps durable topology in the metadata store.
//!
//! Write ordering against the store:
//! - Creates persist first, then register in memory
//! - Removals unregister first, then delete the records
//!
//! No exchange lock is held while the store is called. A failed store call
//! is returned to the caller and the in-memory side is left as it is.

use std::{collections::HashSet, sync::Arc};

use anvil_storage::{Operation, Storage, StorageError};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
	binding::Binding,
	codec::MAX_SHORT_STR,
	exchange::{Exchange, ExchangeConflict, RoutingContext},
	kind::ExchangeKind,
	table::FieldTable,
};

/// Names starting with this prefix belong to the broker
pub const RESERVED_PREFIX: &str = "amq.";

const EXCHANGE_KEY_PREFIX: &str = "exchange";
const BINDING_KEY_PREFIX: &str = "binding";

/// Exchanges every virtual host starts with
const SYSTEM_EXCHANGES: [(&str, ExchangeKind); 6] = [
	("", ExchangeKind::Direct),
	("amq.direct", ExchangeKind::Direct),
	("amq.fanout", ExchangeKind::Fanout),
	("amq.topic", ExchangeKind::Topic),
	("amq.headers", ExchangeKind::Headers),
	("amq.match", ExchangeKind::Headers),
];

/// Error types for registry operations
#[derive(Debug, Error)]
pub enum ExchangeError {
	#[error("Validation failed: {0}")]
	Validation(String),
	#[error("{0}")]
	Conflict(ExchangeConflict),
	#[error("Exchange '{0}' not found")]
	NotFound(String),
	#[error("Access refused: {0}")]
	AccessRefused(String),
	#[error("Exchange '{0}' is in use")]
	InUse(String),
	#[error("Persistence error: {0}")]
	Persistence(#[from] StorageError),
}

/// Result of an active declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareOutcome {
	Created,
	/// An exchange with identical attributes was already registered
	Existing,
}

pub struct VirtualHost {
	name: String,
	/// Hex form of the name used in store keys; it never contains the
	/// `.` separator
	key_scope: String,
	exchanges: DashMap<String, Arc<Exchange>>,
	storage: Arc<dyn Storage>,
	/// Serialises topology mutations; routing never takes it
	topology: Mutex<()>,
}

impl VirtualHost {
	pub fn new(name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
		let name = name.into();
		Self {
			key_scope: hex::encode(name.as_bytes()),
			name,
			exchanges: DashMap::new(),
			storage,
			topology: Mutex::new(()),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Register the default exchanges
	///
	/// They are recreated on every start and never persisted.
	pub fn declare_system_exchanges(&self) {
		let _topology = self.topology.lock();

		for (name, kind) in SYSTEM_EXCHANGES {
			self.exchanges
				.entry(name.to_string())
				.or_insert_with(|| Arc::new(Exchange::new(name, kind, true, false, false, true)));
		}

		debug!(
			target: "vhost",
			vhost = %self.name,
			count = SYSTEM_EXCHANGES.len(),
			"System exchanges declared"
		);
	}

	/// Declare an exchange, creating it if absent
	///
	/// Redeclaring with identical attributes is a no-op; any difference in
	/// kind or flags is a conflict and changes nothing.
	pub fn declare_exchange(
		&self,
		name: &str,
		kind_alias: &str,
		durable: bool,
		auto_delete: bool,
		internal: bool,
		arguments: FieldTable,
	) -> Result<DeclareOutcome, ExchangeError> {
		validate_name(name)?;
		let kind = ExchangeKind::from_alias(kind_alias).ok_or_else(|| {
			ExchangeError::Validation(format!("unknown exchange type '{}'", kind_alias))
		})?;

		let candidate = Exchange::new(name, kind, durable, auto_delete, internal, false)
			.with_arguments(arguments);

		let _topology = self.topology.lock();

		if let Some(existing) = self.exchange(name) {
			if let Some(conflict) = existing.conflict_with(&candidate) {
				warn!(target: "vhost", vhost = %self.name, "{}", conflict);
				return Err(ExchangeError::Conflict(conflict));
			}
			return Ok(DeclareOutcome::Existing);
		}

		if durable {
			self.storage
				.set(&self.exchange_key(name), candidate.encode())?;
		}
		self.exchanges
			.insert(name.to_string(), Arc::new(candidate));

		info!(
			target: "vhost",
			vhost = %self.name,
			exchange = %name,
			kind = %kind,
			durable,
			"Exchange declared"
		);
		Ok(DeclareOutcome::Created)
	}

	/// Check that an exchange exists without creating it
	///
	/// With `no_wait` an absent exchange yields `Ok(None)`, since the caller
	/// sends no reply either way.
	pub fn declare_exchange_passive(
		&self,
		name: &str,
		no_wait: bool,
	) -> Result<Option<Arc<Exchange>>, ExchangeError> {
		if name.is_empty() {
			return Err(ExchangeError::Validation("exchange name is required".to_string()));
		}

		match self.exchange(name) {
			Some(exchange) => Ok(Some(exchange)),
			None if no_wait => Ok(None),
			None => Err(ExchangeError::NotFound(name.to_string())),
		}
	}

	pub fn exchange(&self, name: &str) -> Option<Arc<Exchange>> {
		self.exchanges.get(name).map(|entry| entry.value().clone())
	}

	/// Registered exchange names, sorted
	pub fn exchange_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.exchanges.iter().map(|e| e.key().clone()).collect();
		names.sort();
		names
	}

	pub fn delete_exchange(&self, name: &str, if_unused: bool) -> Result<(), ExchangeError> {
		let _topology = self.topology.lock();

		let exchange = self
			.exchange(name)
			.ok_or_else(|| ExchangeError::NotFound(name.to_string()))?;
		if exchange.is_system() {
			return Err(ExchangeError::AccessRefused(format!(
				"system exchange '{}' cannot be deleted",
				name
			)));
		}
		if if_unused && exchange.binding_count() > 0 {
			return Err(ExchangeError::InUse(name.to_string()));
		}

		self.exchanges.remove(name);

		if exchange.is_durable() {
			let mut batch: Vec<Operation> = exchange
				.bindings()
				.iter()
				.map(|b| Operation::delete(self.binding_key(b)))
				.collect();
			batch.push(Operation::delete(self.exchange_key(name)));
			self.storage.apply_batch(&batch)?;
		}

		info!(target: "vhost", vhost = %self.name, exchange = %name, "Exchange deleted");
		Ok(())
	}

	/// Bind `queue` to `exchange`
	///
	/// Returns false if an equal binding already exists. The binding is
	/// persisted when both the exchange and the queue are durable.
	pub fn bind_queue(
		&self,
		exchange: &str,
		queue: &str,
		routing_key: &str,
		arguments: FieldTable,
		queue_durable: bool,
	) -> Result<bool, ExchangeError> {
		let _topology = self.topology.lock();

		let target = self
			.exchange(exchange)
			.ok_or_else(|| ExchangeError::NotFound(exchange.to_string()))?;
		let binding = Binding::new(queue, exchange, routing_key, arguments, target.kind())
			.map_err(|e| ExchangeError::Validation(e.to_string()))?;

		if target.has_binding(&binding) {
			return Ok(false);
		}

		if target.is_durable() && queue_durable {
			self.storage
				.set(&self.binding_key(&binding), binding.encode())?;
		}
		target.add_binding(binding);

		Ok(true)
	}

	/// Remove a binding; an auto-delete exchange left without bindings is
	/// deleted as well
	pub fn unbind_queue(
		&self,
		exchange: &str,
		queue: &str,
		routing_key: &str,
		arguments: FieldTable,
	) -> Result<bool, ExchangeError> {
		let _topology = self.topology.lock();

		let target = self
			.exchange(exchange)
			.ok_or_else(|| ExchangeError::NotFound(exchange.to_string()))?;
		let binding = Binding::new(queue, exchange, routing_key, arguments, target.kind())
			.map_err(|e| ExchangeError::Validation(e.to_string()))?;

		if !target.remove_binding(&binding) {
			return Ok(false);
		}

		let mut batch = Vec::new();
		if target.is_durable() {
			batch.push(Operation::delete(self.binding_key(&binding)));
		}
		self.release_if_unused(&target, &mut batch);

		if !batch.is_empty() {
			self.storage.apply_batch(&batch)?;
		}
		Ok(true)
	}

	/// Drop every binding to `queue` across all exchanges
	///
	/// Called when a queue is deleted. Returns the removed bindings.
	pub fn remove_queue_bindings(&self, queue: &str) -> Result<Vec<Binding>, ExchangeError> {
		let _topology = self.topology.lock();

		let exchanges: Vec<Arc<Exchange>> =
			self.exchanges.iter().map(|e| e.value().clone()).collect();

		let mut removed = Vec::new();
		let mut batch = Vec::new();

		for exchange in exchanges {
			let bindings = exchange.remove_bindings_for_queue(queue);
			if bindings.is_empty() {
				continue;
			}

			if exchange.is_durable() {
				batch.extend(bindings.iter().map(|b| Operation::delete(self.binding_key(b))));
			}
			self.release_if_unused(&exchange, &mut batch);
			removed.extend(bindings);
		}

		if !batch.is_empty() {
			self.storage.apply_batch(&batch)?;
		}

		debug!(
			target: "vhost",
			vhost = %self.name,
			queue = %queue,
			removed = removed.len(),
			"Queue bindings removed"
		);
		Ok(removed)
	}

	/// Queues a message published to `exchange` must reach
	///
	/// An absent exchange routes to nothing.
	pub fn route(
		&self,
		exchange: &str,
		routing_key: &str,
		headers: Option<&FieldTable>,
	) -> HashSet<String> {
		let Some(target) = self.exchange(exchange) else {
			return HashSet::new();
		};

		target.matched_queues(&RoutingContext {
			exchange,
			routing_key,
			headers,
		})
	}

	pub fn exchange_key(&self, name: &str) -> String {
		format!("{}.{}.{}", EXCHANGE_KEY_PREFIX, self.key_scope, name)
	}

	/// Store key of a binding, derived from its record so equal bindings
	/// share a key
	pub fn binding_key(&self, binding: &Binding) -> String {
		format!(
			"{}.{}.{}",
			BINDING_KEY_PREFIX,
			self.key_scope,
			hex::encode(binding.encode())
		)
	}

	pub(crate) fn exchange_key_prefix(&self) -> String {
		format!("{}.{}.", EXCHANGE_KEY_PREFIX, self.key_scope)
	}

	pub(crate) fn binding_key_prefix(&self) -> String {
		format!("{}.{}.", BINDING_KEY_PREFIX, self.key_scope)
	}

	/// Register an exchange read back from the store
	///
	/// Returns false if the name is already taken.
	pub(crate) fn restore_exchange(&self, exchange: Exchange) -> bool {
		match self.exchanges.entry(exchange.name().to_string()) {
			Entry::Occupied(_) => false,
			Entry::Vacant(slot) => {
				slot.insert(Arc::new(exchange));
				true
			}
		}
	}

	/// Remove an auto-delete exchange that no longer has bindings
	fn release_if_unused(&self, exchange: &Exchange, batch: &mut Vec<Operation>) {
		if !exchange.is_auto_delete() || exchange.is_system() || exchange.binding_count() > 0 {
			return;
		}

		self.exchanges.remove(exchange.name());
		if exchange.is_durable() {
			batch.push(Operation::delete(self.exchange_key(exchange.name())));
		}

		info!(
			target: "vhost",
			vhost = %self.name,
			exchange = %exchange.name(),
			"Auto-delete exchange removed"
		);
	}
}

fn validate_name(name: &str) -> Result<(), ExchangeError> {
	if name.is_empty() {
		return Err(ExchangeError::Validation("exchange name is required".to_string()));
	}
	if name.len() > MAX_SHORT_STR {
		return Err(ExchangeError::Validation(format!(
			"exchange name longer than {} bytes",
			MAX_SHORT_STR
		)));
	}
	if name.starts_with(RESERVED_PREFIX) {
		return Err(ExchangeError::Validation(format!(
			"exchange name '{}' uses the reserved prefix '{}'",
			name, RESERVED_PREFIX
		)));
	}
	Ok(())
}
