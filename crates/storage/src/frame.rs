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

//! On-disk batch frames
//!
//! Frame layout (little-endian):
//! - Payload length (4 bytes)
//! - CRC32 of payload (4 bytes)
//! - Payload: op count (4 bytes), then per op
//!   `[tag][key len][key]` and `[value len][value]` for sets

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::Operation;

pub(crate) const FRAME_HEADER_LEN: usize = 8;

const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

#[derive(Debug, Error)]
pub(crate) enum FrameError {
	#[error("torn frame: need {needed} bytes, have {available}")]
	Torn { needed: usize, available: usize },
	#[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
	Checksum { stored: u32, computed: u32 },
	#[error("malformed payload: {0}")]
	Malformed(&'static str),
}

/// Encode a batch as one frame
pub(crate) fn encode_batch(batch: &[Operation]) -> Bytes {
	let mut payload = BytesMut::new();
	payload.put_u32_le(batch.len() as u32);

	for op in batch {
		match op {
			Operation::Set { key, value } => {
				payload.put_u8(OP_SET);
				payload.put_u32_le(key.len() as u32);
				payload.put_slice(key.as_bytes());
				payload.put_u32_le(value.len() as u32);
				payload.put_slice(value);
			}
			Operation::Delete { key } => {
				payload.put_u8(OP_DELETE);
				payload.put_u32_le(key.len() as u32);
				payload.put_slice(key.as_bytes());
			}
		}
	}

	let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
	frame.put_u32_le(payload.len() as u32);
	frame.put_u32_le(crc32fast::hash(&payload));
	frame.put_slice(&payload);
	frame.freeze()
}

/// Total length the frame at the start of `buf` claims, if its header is
/// complete
pub(crate) fn declared_len(buf: &[u8]) -> Option<usize> {
	if buf.len() < FRAME_HEADER_LEN {
		return None;
	}
	let mut header = &buf[..4];
	Some(FRAME_HEADER_LEN + header.get_u32_le() as usize)
}

/// Decode the frame at the start of `buf`
///
/// Returns `Ok(None)` at a clean end of log, otherwise the batch and the
/// number of bytes consumed.
pub(crate) fn decode_frame(buf: &[u8]) -> Result<Option<(Vec<Operation>, usize)>, FrameError> {
	if buf.is_empty() {
		return Ok(None);
	}
	if buf.len() < FRAME_HEADER_LEN {
		return Err(FrameError::Torn {
			needed: FRAME_HEADER_LEN,
			available: buf.len(),
		});
	}

	let mut header = &buf[..FRAME_HEADER_LEN];
	let payload_len = header.get_u32_le() as usize;
	let stored = header.get_u32_le();

	let frame_len = FRAME_HEADER_LEN + payload_len;
	if buf.len() < frame_len {
		return Err(FrameError::Torn {
			needed: frame_len,
			available: buf.len(),
		});
	}

	let payload = &buf[FRAME_HEADER_LEN..frame_len];
	let computed = crc32fast::hash(payload);
	if computed != stored {
		return Err(FrameError::Checksum { stored, computed });
	}

	Ok(Some((decode_payload(payload)?, frame_len)))
}

fn decode_payload(mut payload: &[u8]) -> Result<Vec<Operation>, FrameError> {
	let count = take_u32(&mut payload)? as usize;
	let mut batch = Vec::with_capacity(count.min(1024));

	for _ in 0..count {
		if !payload.has_remaining() {
			return Err(FrameError::Malformed("missing op tag"));
		}
		let tag = payload.get_u8();
		let key = take_bytes(&mut payload)?;
		let key = String::from_utf8(key.to_vec())
			.map_err(|_| FrameError::Malformed("key is not utf-8"))?;

		match tag {
			OP_SET => {
				let value = Bytes::copy_from_slice(take_bytes(&mut payload)?);
				batch.push(Operation::Set { key, value });
			}
			OP_DELETE => batch.push(Operation::Delete { key }),
			_ => return Err(FrameError::Malformed("unknown op tag")),
		}
	}

	if payload.has_remaining() {
		return Err(FrameError::Malformed("trailing bytes after last op"));
	}

	Ok(batch)
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, FrameError> {
	if buf.remaining() < 4 {
		return Err(FrameError::Malformed("truncated length"));
	}
	Ok(buf.get_u32_le())
}

fn take_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], FrameError> {
	let len = take_u32(buf)? as usize;
	if buf.len() < len {
		return Err(FrameError::Malformed("truncated field"));
	}
	let (field, rest) = buf.split_at(len);
	*buf = rest;
	Ok(field)
}
