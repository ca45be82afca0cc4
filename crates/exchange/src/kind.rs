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

use std::fmt;

/// Routing algorithm of an exchange
///
/// The byte codes are part of the persisted record format and must not
/// change. `Unknown` only comes out of decoding a record written with a
/// code this build does not know; it routes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
	Direct,
	Fanout,
	Topic,
	Headers,
	Unknown(u8),
}

impl ExchangeKind {
	pub fn from_alias(alias: &str) -> Option<Self> {
		match alias {
			"direct" => Some(ExchangeKind::Direct),
			"fanout" => Some(ExchangeKind::Fanout),
			"topic" => Some(ExchangeKind::Topic),
			"headers" => Some(ExchangeKind::Headers),
			_ => None,
		}
	}

	pub fn alias(&self) -> &'static str {
		match self {
			ExchangeKind::Direct => "direct",
			ExchangeKind::Fanout => "fanout",
			ExchangeKind::Topic => "topic",
			ExchangeKind::Headers => "headers",
			ExchangeKind::Unknown(_) => "unknown",
		}
	}

	pub fn from_byte(byte: u8) -> Self {
		match byte {
			1 => ExchangeKind::Direct,
			2 => ExchangeKind::Fanout,
			3 => ExchangeKind::Topic,
			4 => ExchangeKind::Headers,
			other => ExchangeKind::Unknown(other),
		}
	}

	pub fn as_byte(&self) -> u8 {
		match self {
			ExchangeKind::Direct => 1,
			ExchangeKind::Fanout => 2,
			ExchangeKind::Topic => 3,
			ExchangeKind::Headers => 4,
			ExchangeKind::Unknown(byte) => *byte,
		}
	}
}

impl fmt::Display for ExchangeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExchangeKind::Unknown(byte) => write!(f, "unknown({})", byte),
			known => f.write_str(known.alias()),
		}
	}
}
