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

//! Binding matchers
//!
//! Pure predicates evaluated against a routing key or header table. They
//! hold no shared state; patterns are parsed once when a binding is made.

use crate::{
	binding::BindingError,
	table::{FieldTable, FieldValue},
};

/// Word delimiter of topic routing keys
pub const TOPIC_DELIMITER: char = '.';

/// Argument selecting all/any semantics for headers bindings
pub const X_MATCH: &str = "x-match";

#[derive(Debug, Clone, PartialEq, Eq)]
enum TopicWord {
	Literal(String),
	/// `*`: exactly one word
	One,
	/// `#`: zero or more words
	Many,
}

/// Parsed topic binding pattern
///
/// Matching runs a dynamic program over (pattern word, key word) suffixes,
/// so every placement of each `#` is considered; `a.#.b.#.c` style patterns
/// need that backtracking to be correct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
	words: Vec<TopicWord>,
}

impl TopicPattern {
	pub fn parse(pattern: &str) -> Self {
		let mut words: Vec<TopicWord> = Vec::new();

		for word in split_words(pattern) {
			let word = match word {
				"*" => TopicWord::One,
				"#" => TopicWord::Many,
				literal => TopicWord::Literal(literal.to_string()),
			};
			// `#.#` matches the same keys as `#`
			if word == TopicWord::Many && words.last() == Some(&TopicWord::Many) {
				continue;
			}
			words.push(word);
		}

		Self { words }
	}

	pub fn matches(&self, routing_key: &str) -> bool {
		let key = split_words(routing_key);
		let n = key.len();

		// next[j]: the pattern suffix processed so far matches key[j..]
		let mut next = vec![false; n + 1];
		next[n] = true;

		for word in self.words.iter().rev() {
			let mut current = vec![false; n + 1];
			for j in (0..=n).rev() {
				current[j] = match word {
					TopicWord::Many => next[j] || (j < n && current[j + 1]),
					TopicWord::One => j < n && next[j + 1],
					TopicWord::Literal(literal) => j < n && key[j] == literal && next[j + 1],
				};
			}
			next = current;
		}

		next[0]
	}
}

/// The empty string has zero words
fn split_words(s: &str) -> Vec<&str> {
	if s.is_empty() {
		Vec::new()
	} else {
		s.split(TOPIC_DELIMITER).collect()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
	All,
	Any,
}

/// Header predicate of a headers-exchange binding
#[derive(Debug, Clone, PartialEq)]
pub struct HeadersMatch {
	mode: MatchMode,
	/// Binding arguments minus the `x-` prefixed ones
	criteria: Vec<(String, FieldValue)>,
}

impl HeadersMatch {
	pub fn from_arguments(arguments: &FieldTable) -> Result<Self, BindingError> {
		let mode = match arguments.get(X_MATCH) {
			None => MatchMode::All,
			Some(value) => match value.as_str() {
				Some("all") => MatchMode::All,
				Some("any") => MatchMode::Any,
				_ => return Err(BindingError::InvalidMatchMode(format!("{:?}", value))),
			},
		};

		let criteria = arguments
			.iter()
			.filter(|(key, _)| !key.starts_with("x-"))
			.map(|(key, value)| (key.clone(), value.clone()))
			.collect();

		Ok(Self { mode, criteria })
	}

	pub fn mode(&self) -> MatchMode {
		self.mode
	}

	pub fn matches(&self, headers: Option<&FieldTable>) -> bool {
		let satisfied = |(key, expected): &(String, FieldValue)| {
			headers
				.and_then(|h| h.get(key))
				.is_some_and(|actual| *expected == FieldValue::Void || actual == expected)
		};

		match self.mode {
			MatchMode::All => self.criteria.iter().all(satisfied),
			MatchMode::Any => self.criteria.iter().any(satisfied),
		}
	}
}
