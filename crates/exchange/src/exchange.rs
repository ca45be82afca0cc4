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

//! Exchange
//!
//! One exchange's identity, flags and binding set. Every binding-set
//! operation, routing queries included, goes through the same exclusive
//! lock, so no caller ever observes a half-updated set.

use std::collections::HashSet;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::{
	binding::Binding,
	codec::{self, DecodeError},
	kind::ExchangeKind,
	table::FieldTable,
};

/// Per-publish routing input; never stored
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
	pub exchange: &'a str,
	pub routing_key: &'a str,
	pub headers: Option<&'a FieldTable>,
}

/// First attribute that differs between an existing exchange and a
/// redeclaration of it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("inequivalent arg '{attribute}' for exchange '{exchange}': received '{received}' but current is '{current}'")]
pub struct ExchangeConflict {
	pub exchange: String,
	pub attribute: &'static str,
	pub current: String,
	pub received: String,
}

#[derive(Debug)]
pub struct Exchange {
	name: String,
	kind: ExchangeKind,
	durable: bool,
	auto_delete: bool,
	internal: bool,
	system: bool,
	arguments: FieldTable,
	bindings: Mutex<Vec<Binding>>,
}

impl Exchange {
	/// Build an exchange from its fields as given
	///
	/// Name validation belongs to the virtual host.
	pub fn new(
		name: impl Into<String>,
		kind: ExchangeKind,
		durable: bool,
		auto_delete: bool,
		internal: bool,
		system: bool,
	) -> Self {
		Self {
			name: name.into(),
			kind,
			durable,
			auto_delete,
			internal,
			system,
			arguments: FieldTable::new(),
			bindings: Mutex::new(Vec::new()),
		}
	}

	pub fn with_arguments(mut self, arguments: FieldTable) -> Self {
		self.arguments = arguments;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn kind(&self) -> ExchangeKind {
		self.kind
	}

	pub fn is_durable(&self) -> bool {
		self.durable
	}

	pub fn is_auto_delete(&self) -> bool {
		self.auto_delete
	}

	pub fn is_internal(&self) -> bool {
		self.internal
	}

	pub fn is_system(&self) -> bool {
		self.system
	}

	pub fn arguments(&self) -> &FieldTable {
		&self.arguments
	}

	/// Copy of the current binding set, in insertion order
	pub fn bindings(&self) -> Vec<Binding> {
		self.bindings.lock().clone()
	}

	pub fn binding_count(&self) -> usize {
		self.bindings.lock().len()
	}

	pub fn has_binding(&self, binding: &Binding) -> bool {
		self.bindings.lock().contains(binding)
	}

	/// Append a binding unless an equal one is already present
	///
	/// Returns whether the set changed.
	pub fn add_binding(&self, binding: Binding) -> bool {
		let mut bindings = self.bindings.lock();
		if bindings.contains(&binding) {
			return false;
		}

		debug!(
			target: "exchange",
			exchange = %self.name,
			queue = %binding.queue(),
			routing_key = %binding.routing_key(),
			"Binding added"
		);
		bindings.push(binding);
		true
	}

	/// Remove the first binding equal to `binding`
	pub fn remove_binding(&self, binding: &Binding) -> bool {
		let mut bindings = self.bindings.lock();
		match bindings.iter().position(|b| b == binding) {
			Some(index) => {
				bindings.remove(index);
				true
			}
			None => false,
		}
	}

	/// Remove every binding to `queue`, returning them in insertion order
	pub fn remove_bindings_for_queue(&self, queue: &str) -> Vec<Binding> {
		let mut bindings = self.bindings.lock();
		let (removed, kept): (Vec<_>, Vec<_>) =
			bindings.drain(..).partition(|b| b.queue() == queue);
		*bindings = kept;
		removed
	}

	/// Queues the message described by `ctx` must be delivered to
	///
	/// Direct exchanges stop at the oldest matching binding. Unknown kinds
	/// route nothing.
	pub fn matched_queues(&self, ctx: &RoutingContext<'_>) -> HashSet<String> {
		let bindings = self.bindings.lock();

		let queue_name = |b: &Binding| b.queue().to_string();
		let mut matched = HashSet::new();

		match self.kind {
			ExchangeKind::Direct => {
				if let Some(binding) = bindings
					.iter()
					.find(|b| b.match_direct(ctx.exchange, ctx.routing_key))
				{
					matched.insert(queue_name(binding));
				}
			}
			ExchangeKind::Fanout => matched.extend(
				bindings
					.iter()
					.filter(|b| b.match_fanout(ctx.exchange))
					.map(queue_name),
			),
			ExchangeKind::Topic => matched.extend(
				bindings
					.iter()
					.filter(|b| b.match_topic(ctx.exchange, ctx.routing_key))
					.map(queue_name),
			),
			ExchangeKind::Headers => matched.extend(
				bindings
					.iter()
					.filter(|b| b.match_headers(ctx.exchange, ctx.headers))
					.map(queue_name),
			),
			ExchangeKind::Unknown(_) => {}
		}

		matched
	}

	/// Compare the immutable attributes against a redeclaration
	///
	/// `self` is the registered exchange, `other` the one being declared.
	pub fn conflict_with(&self, other: &Exchange) -> Option<ExchangeConflict> {
		let conflict = |attribute: &'static str, current: String, received: String| {
			Some(ExchangeConflict {
				exchange: self.name.clone(),
				attribute,
				current,
				received,
			})
		};

		if self.kind != other.kind {
			return conflict("type", self.kind.to_string(), other.kind.to_string());
		}
		if self.durable != other.durable {
			return conflict("durable", self.durable.to_string(), other.durable.to_string());
		}
		if self.auto_delete != other.auto_delete {
			return conflict(
				"auto_delete",
				self.auto_delete.to_string(),
				other.auto_delete.to_string(),
			);
		}
		if self.internal != other.internal {
			return conflict("internal", self.internal.to_string(), other.internal.to_string());
		}
		None
	}

	/// Persisted record: the name as a short string and the kind byte
	pub fn encode(&self) -> Bytes {
		let mut buf = BytesMut::with_capacity(self.name.len() + 2);
		codec::write_short_str(&mut buf, &self.name);
		buf.extend_from_slice(&[self.kind.as_byte()]);
		buf.freeze()
	}

	/// Decode a persisted record
	///
	/// Only durable exchanges are ever written, so the result is always
	/// durable. `auto_delete` and `internal` are not part of the record and
	/// come back false.
	pub fn decode(record: &[u8]) -> Result<Self, DecodeError> {
		let mut buf = record;
		let name = codec::read_short_str(&mut buf, "exchange name")?;
		let kind = ExchangeKind::from_byte(codec::read_u8(&mut buf, "exchange kind")?);
		Ok(Self::new(name, kind, true, false, false, false))
	}
}
