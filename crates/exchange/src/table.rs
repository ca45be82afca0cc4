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

use std::collections::BTreeMap;

/// Argument and header table, ordered by key
pub type FieldTable = BTreeMap<String, FieldValue>;

/// A single argument or header value
#[derive(Debug, Clone)]
pub enum FieldValue {
	/// Presence-only value; in a headers binding it matches any header value
	Void,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	Bytes(Vec<u8>),
}

impl FieldValue {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			FieldValue::Str(s) => Some(s),
			_ => None,
		}
	}
}

// Floats compare by bit pattern so that a table always equals itself, NaN
// included
impl PartialEq for FieldValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(FieldValue::Void, FieldValue::Void) => true,
			(FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
			(FieldValue::Int(a), FieldValue::Int(b)) => a == b,
			(FieldValue::Float(a), FieldValue::Float(b)) => a.to_bits() == b.to_bits(),
			(FieldValue::Str(a), FieldValue::Str(b)) => a == b,
			(FieldValue::Bytes(a), FieldValue::Bytes(b)) => a == b,
			_ => false,
		}
	}
}

impl Eq for FieldValue {}

impl From<&str> for FieldValue {
	fn from(value: &str) -> Self {
		FieldValue::Str(value.to_string())
	}
}

impl From<String> for FieldValue {
	fn from(value: String) -> Self {
		FieldValue::Str(value)
	}
}

impl From<i64> for FieldValue {
	fn from(value: i64) -> Self {
		FieldValue::Int(value)
	}
}

impl From<bool> for FieldValue {
	fn from(value: bool) -> Self {
		FieldValue::Bool(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_nan_float_equals_itself() {
		let value = FieldValue::Float(f64::NAN);
		assert_eq!(value, value.clone());

		let mut table = FieldTable::new();
		table.insert("weight".to_string(), FieldValue::Float(f64::NAN));
		assert_eq!(table, table.clone());
	}

	#[test]
	fn test_values_of_different_types_differ() {
		assert_ne!(FieldValue::Int(1), FieldValue::Float(1.0));
		assert_ne!(FieldValue::Float(0.0), FieldValue::Float(-0.0));
		assert_ne!(FieldValue::Void, FieldValue::Bool(false));
	}
}
