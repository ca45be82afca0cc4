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

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::{
	codec::{self, DecodeError, MAX_SHORT_STR},
	kind::ExchangeKind,
	matcher::{HeadersMatch, TopicPattern},
	table::FieldTable,
};

/// Error types for binding construction
#[derive(Debug, Error)]
pub enum BindingError {
	#[error("Invalid x-match value: {0}")]
	InvalidMatchMode(String),
	#[error("Binding {field} is {len} bytes, longer than {max}", max = MAX_SHORT_STR)]
	TooLong { field: &'static str, len: usize },
	#[error("Binding record references unknown exchange '{0}'")]
	UnknownExchange(String),
	#[error("Malformed binding record: {0}")]
	Decode(#[from] DecodeError),
}

/// Rule linking an exchange to a queue
///
/// Equality covers queue, exchange, routing key and arguments. The parsed
/// matchers are derived from those fields and do not take part.
#[derive(Debug, Clone)]
pub struct Binding {
	queue: String,
	exchange: String,
	routing_key: String,
	arguments: FieldTable,
	topic: Option<TopicPattern>,
	headers: Option<HeadersMatch>,
}

impl Binding {
	/// Create a binding for an exchange of the given kind
	///
	/// Topic patterns and header predicates are parsed here, once.
	pub fn new(
		queue: impl Into<String>,
		exchange: impl Into<String>,
		routing_key: impl Into<String>,
		arguments: FieldTable,
		kind: ExchangeKind,
	) -> Result<Self, BindingError> {
		let queue = queue.into();
		let exchange = exchange.into();
		let routing_key = routing_key.into();

		// These fields are short strings in the stored record
		check_len("queue name", &queue)?;
		check_len("exchange name", &exchange)?;
		check_len("routing key", &routing_key)?;
		for key in arguments.keys() {
			check_len("argument key", key)?;
		}

		let topic = match kind {
			ExchangeKind::Topic => Some(TopicPattern::parse(&routing_key)),
			_ => None,
		};
		let headers = match kind {
			ExchangeKind::Headers => Some(HeadersMatch::from_arguments(&arguments)?),
			_ => None,
		};

		Ok(Self {
			queue,
			exchange,
			routing_key,
			arguments,
			topic,
			headers,
		})
	}

	pub fn queue(&self) -> &str {
		&self.queue
	}

	pub fn exchange(&self) -> &str {
		&self.exchange
	}

	pub fn routing_key(&self) -> &str {
		&self.routing_key
	}

	pub fn arguments(&self) -> &FieldTable {
		&self.arguments
	}

	pub fn match_direct(&self, exchange: &str, routing_key: &str) -> bool {
		self.exchange == exchange && self.routing_key == routing_key
	}

	pub fn match_fanout(&self, exchange: &str) -> bool {
		self.exchange == exchange
	}

	pub fn match_topic(&self, exchange: &str, routing_key: &str) -> bool {
		self.exchange == exchange
			&& self
				.topic
				.as_ref()
				.is_some_and(|pattern| pattern.matches(routing_key))
	}

	pub fn match_headers(&self, exchange: &str, headers: Option<&FieldTable>) -> bool {
		self.exchange == exchange
			&& self
				.headers
				.as_ref()
				.is_some_and(|predicate| predicate.matches(headers))
	}

	/// Persisted record: queue, exchange and routing key as short strings,
	/// then the argument table
	pub fn encode(&self) -> Bytes {
		let mut buf = BytesMut::new();
		codec::write_short_str(&mut buf, &self.queue);
		codec::write_short_str(&mut buf, &self.exchange);
		codec::write_short_str(&mut buf, &self.routing_key);
		codec::write_table(&mut buf, &self.arguments);
		buf.freeze()
	}

	/// Decode a persisted record
	///
	/// `kind_of` resolves the owning exchange's kind, which decides how the
	/// routing key and arguments are parsed.
	pub fn decode<F>(record: &[u8], kind_of: F) -> Result<Self, BindingError>
	where
		F: FnOnce(&str) -> Option<ExchangeKind>,
	{
		let mut buf = record;
		let queue = codec::read_short_str(&mut buf, "queue")?;
		let exchange = codec::read_short_str(&mut buf, "exchange")?;
		let routing_key = codec::read_short_str(&mut buf, "routing key")?;
		let arguments = codec::read_table(&mut buf)?;

		let kind = kind_of(&exchange).ok_or_else(|| BindingError::UnknownExchange(exchange.clone()))?;
		Self::new(queue, exchange, routing_key, arguments, kind)
	}
}

impl PartialEq for Binding {
	fn eq(&self, other: &Self) -> bool {
		self.queue == other.queue
			&& self.exchange == other.exchange
			&& self.routing_key == other.routing_key
			&& self.arguments == other.arguments
	}
}

fn check_len(field: &'static str, value: &str) -> Result<(), BindingError> {
	if value.len() > MAX_SHORT_STR {
		return Err(BindingError::TooLong {
			field,
			len: value.len(),
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::table::FieldValue;

	fn binding(queue: &str, routing_key: &str, kind: ExchangeKind) -> Binding {
		Binding::new(queue, "logs", routing_key, FieldTable::new(), kind).unwrap()
	}

	#[test]
	fn test_equality_ignores_parsed_matchers() {
		let a = binding("q1", "a.*", ExchangeKind::Topic);
		let b = binding("q1", "a.*", ExchangeKind::Direct);
		assert_eq!(a, b);

		assert_ne!(a, binding("q2", "a.*", ExchangeKind::Topic));
		assert_ne!(a, binding("q1", "a.#", ExchangeKind::Topic));

		let mut args = FieldTable::new();
		args.insert("format".to_string(), FieldValue::from("pdf"));
		let with_args = Binding::new("q1", "logs", "a.*", args, ExchangeKind::Topic).unwrap();
		assert_ne!(a, with_args);
	}

	#[test]
	fn test_matchers_check_exchange_name() {
		let direct = binding("q1", "info", ExchangeKind::Direct);
		assert!(direct.match_direct("logs", "info"));
		assert!(!direct.match_direct("other", "info"));
		assert!(!direct.match_direct("logs", "warn"));

		assert!(direct.match_fanout("logs"));
		assert!(!direct.match_fanout("other"));

		let topic = binding("q1", "app.*", ExchangeKind::Topic);
		assert!(topic.match_topic("logs", "app.start"));
		assert!(!topic.match_topic("other", "app.start"));

		// no parsed pattern when bound for a non-topic exchange
		assert!(!direct.match_topic("logs", "info"));
	}

	#[test]
	fn test_invalid_match_mode_rejected_only_for_headers() {
		let mut args = FieldTable::new();
		args.insert("x-match".to_string(), FieldValue::from("some"));

		let result = Binding::new("q1", "h", "", args.clone(), ExchangeKind::Headers);
		assert!(matches!(result, Err(BindingError::InvalidMatchMode(_))));

		assert!(Binding::new("q1", "d", "", args, ExchangeKind::Direct).is_ok());
	}

	#[test]
	fn test_record_decodes_with_exchange_kind() {
		let mut args = FieldTable::new();
		args.insert("x-match".to_string(), FieldValue::from("any"));
		args.insert("region".to_string(), FieldValue::from("eu"));
		let original = Binding::new("q1", "events", "", args, ExchangeKind::Headers).unwrap();

		let decoded = Binding::decode(&original.encode(), |exchange| {
			assert_eq!(exchange, "events");
			Some(ExchangeKind::Headers)
		})
		.unwrap();
		assert_eq!(decoded, original);

		let mut headers = FieldTable::new();
		headers.insert("region".to_string(), FieldValue::from("eu"));
		assert!(decoded.match_headers("events", Some(&headers)));
	}

	#[test]
	fn test_fields_longer_than_short_string_rejected() {
		let long = "é".repeat(128);
		let result = Binding::new("q1", "logs", long.as_str(), FieldTable::new(), ExchangeKind::Direct);
		assert!(matches!(
			result,
			Err(BindingError::TooLong { field: "routing key", len: 256 })
		));

		let result = Binding::new(long.as_str(), "logs", "", FieldTable::new(), ExchangeKind::Fanout);
		assert!(matches!(result, Err(BindingError::TooLong { field: "queue name", .. })));

		let mut args = FieldTable::new();
		args.insert(long.clone(), FieldValue::Void);
		let result = Binding::new("q1", "logs", "", args, ExchangeKind::Headers);
		assert!(matches!(result, Err(BindingError::TooLong { field: "argument key", .. })));

		// exactly at the limit is fine and survives the record
		let key = "k".repeat(MAX_SHORT_STR);
		let original = Binding::new("q1", "logs", key.as_str(), FieldTable::new(), ExchangeKind::Direct).unwrap();
		let decoded = Binding::decode(&original.encode(), |_| Some(ExchangeKind::Direct)).unwrap();
		assert_eq!(decoded.routing_key(), key);
	}

	#[test]
	fn test_nan_argument_binding_equals_itself() {
		let mut args = FieldTable::new();
		args.insert("weight".to_string(), FieldValue::Float(f64::NAN));
		let a = Binding::new("q1", "logs", "", args, ExchangeKind::Fanout).unwrap();
		assert_eq!(a, a.clone());
	}

	#[test]
	fn test_record_for_unknown_exchange() {
		let record = binding("q1", "info", ExchangeKind::Direct).encode();
		let result = Binding::decode(&record, |_| None);
		assert!(matches!(result, Err(BindingError::UnknownExchange(name)) if name == "logs"));

		let result = Binding::decode(&record[..4], |_| Some(ExchangeKind::Direct));
		assert!(matches!(result, Err(BindingError::Decode(_))));
	}
}
