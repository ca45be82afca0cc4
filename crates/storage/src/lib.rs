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

//! Anvil Metadata Storage
//!
//! This crate provides the transactional key/value store that keeps broker
//! metadata (durable exchanges, bindings, queues) across restarts.
//!
//! Architecture:
//! - Append-only data file, one checksummed frame per committed batch
//! - In-memory ordered index rebuilt from the file at open
//! - Every batch is fsynced before it becomes visible
//! - Background compactor rewrites the live key set on a fixed interval
//!
//! The store knows nothing about the shapes it holds: callers own the
//! encoding of their values.

pub mod compactor;
pub mod config;
pub mod engine;
mod frame;
pub mod memory;

use bytes::Bytes;
use thiserror::Error;

pub use compactor::Compactor;
pub use config::StorageConfig;
pub use engine::{CompactionStats, DATA_FILE_NAME, StorageEngine};
pub use memory::MemoryStorage;

/// Error types for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Storage I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Storage corrupted: {0}")]
	Corrupted(String),
	#[error("Storage is closed")]
	Closed,
}

/// A single write inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
	Set { key: String, value: Bytes },
	Delete { key: String },
}

impl Operation {
	pub fn set(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
		Operation::Set {
			key: key.into(),
			value: value.into(),
		}
	}

	pub fn delete(key: impl Into<String>) -> Self {
		Operation::Delete { key: key.into() }
	}

	pub fn key(&self) -> &str {
		match self {
			Operation::Set { key, .. } => key,
			Operation::Delete { key } => key,
		}
	}
}

/// Storage trait - persistence layer for broker metadata
///
/// Key properties:
/// - Atomic: every operation of a batch becomes visible, or none does
/// - Durable: a batch survives a crash once `apply_batch` has returned
/// - Ordered: `iterate_all` visits keys in ascending order
///
/// This abstraction allows different backing stores:
/// - Append-only file with fsync (production)
/// - In-memory map (testing)
pub trait Storage: Send + Sync {
	/// Apply all operations as a single transaction
	fn apply_batch(&self, batch: &[Operation]) -> Result<(), StorageError>;

	/// Point lookup against the latest committed batch
	fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

	/// Visit every key in ascending order until the visitor returns false
	fn iterate_all(&self, visit: &mut dyn FnMut(&str, &[u8]) -> bool)
	-> Result<(), StorageError>;

	fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
		self.apply_batch(&[Operation::set(key, value)])
	}

	fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.apply_batch(&[Operation::delete(key)])
	}
}
