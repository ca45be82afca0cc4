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

//! Binary primitives for persisted topology records
//!
//! Short strings are a one-byte length followed by UTF-8 bytes. Tables are
//! a big-endian `u32` entry count followed by `[short-string key][tag][value]`.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::table::{FieldTable, FieldValue};

/// Longest string a short-string field can hold
pub const MAX_SHORT_STR: usize = u8::MAX as usize;

const TAG_VOID: u8 = b'V';
const TAG_BOOL: u8 = b't';
const TAG_INT: u8 = b'l';
const TAG_FLOAT: u8 = b'd';
const TAG_STR: u8 = b'S';
const TAG_BYTES: u8 = b'x';

/// Error types for record decoding
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
	#[error("Unexpected end of record while reading {0}")]
	UnexpectedEnd(&'static str),
	#[error("Invalid UTF-8 in {0}")]
	InvalidUtf8(&'static str),
	#[error("Unknown field tag: {0:#04x}")]
	UnknownTag(u8),
}

/// Write a short string, truncated at 255 bytes
///
/// Callers validate names before they reach persistence, so truncation
/// only guards the format.
pub fn write_short_str(buf: &mut impl BufMut, value: &str) {
	let bytes = value.as_bytes();
	let len = bytes.len().min(MAX_SHORT_STR);
	buf.put_u8(len as u8);
	buf.put_slice(&bytes[..len]);
}

pub fn read_short_str(buf: &mut impl Buf, field: &'static str) -> Result<String, DecodeError> {
	let len = read_u8(buf, field)? as usize;
	let raw = read_raw(buf, len, field)?;
	String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8(field))
}

pub fn read_u8(buf: &mut impl Buf, field: &'static str) -> Result<u8, DecodeError> {
	if !buf.has_remaining() {
		return Err(DecodeError::UnexpectedEnd(field));
	}
	Ok(buf.get_u8())
}

fn read_u32(buf: &mut impl Buf, field: &'static str) -> Result<u32, DecodeError> {
	if buf.remaining() < 4 {
		return Err(DecodeError::UnexpectedEnd(field));
	}
	Ok(buf.get_u32())
}

fn read_raw(buf: &mut impl Buf, len: usize, field: &'static str) -> Result<Vec<u8>, DecodeError> {
	if buf.remaining() < len {
		return Err(DecodeError::UnexpectedEnd(field));
	}
	let mut raw = vec![0u8; len];
	buf.copy_to_slice(&mut raw);
	Ok(raw)
}

pub fn write_table(buf: &mut impl BufMut, table: &FieldTable) {
	buf.put_u32(table.len() as u32);
	for (key, value) in table {
		write_short_str(buf, key);
		match value {
			FieldValue::Void => buf.put_u8(TAG_VOID),
			FieldValue::Bool(b) => {
				buf.put_u8(TAG_BOOL);
				buf.put_u8(u8::from(*b));
			}
			FieldValue::Int(i) => {
				buf.put_u8(TAG_INT);
				buf.put_i64(*i);
			}
			FieldValue::Float(f) => {
				buf.put_u8(TAG_FLOAT);
				buf.put_f64(*f);
			}
			FieldValue::Str(s) => {
				buf.put_u8(TAG_STR);
				buf.put_u32(s.len() as u32);
				buf.put_slice(s.as_bytes());
			}
			FieldValue::Bytes(b) => {
				buf.put_u8(TAG_BYTES);
				buf.put_u32(b.len() as u32);
				buf.put_slice(b);
			}
		}
	}
}

pub fn read_table(buf: &mut impl Buf) -> Result<FieldTable, DecodeError> {
	let count = read_u32(buf, "table size")?;
	let mut table = FieldTable::new();

	for _ in 0..count {
		let key = read_short_str(buf, "table key")?;
		let value = match read_u8(buf, "field tag")? {
			TAG_VOID => FieldValue::Void,
			TAG_BOOL => FieldValue::Bool(read_u8(buf, "bool field")? != 0),
			TAG_INT => {
				if buf.remaining() < 8 {
					return Err(DecodeError::UnexpectedEnd("int field"));
				}
				FieldValue::Int(buf.get_i64())
			}
			TAG_FLOAT => {
				if buf.remaining() < 8 {
					return Err(DecodeError::UnexpectedEnd("float field"));
				}
				FieldValue::Float(buf.get_f64())
			}
			TAG_STR => {
				let len = read_u32(buf, "string field")? as usize;
				let raw = read_raw(buf, len, "string field")?;
				FieldValue::Str(
					String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8("string field"))?,
				)
			}
			TAG_BYTES => {
				let len = read_u32(buf, "bytes field")? as usize;
				FieldValue::Bytes(read_raw(buf, len, "bytes field")?)
			}
			tag => return Err(DecodeError::UnknownTag(tag)),
		};
		table.insert(key, value);
	}

	Ok(table)
}
