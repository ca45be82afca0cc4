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

use std::{
	collections::BTreeMap,
	io,
	sync::atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{Operation, Storage, StorageError};

/// In-memory storage for tests and embedding
///
/// Same atomicity contract as the file engine, no durability. Batches can
/// be made to fail on demand to exercise callers' error paths.
pub struct MemoryStorage {
	entries: RwLock<BTreeMap<String, Bytes>>,
	/// Number of upcoming batches to reject
	failures: AtomicUsize,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			entries: RwLock::new(BTreeMap::new()),
			failures: AtomicUsize::new(0),
		}
	}

	/// Reject the next `count` batches with an I/O error
	pub fn fail_next_batches(&self, count: usize) {
		self.failures.store(count, Ordering::SeqCst);
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn keys(&self) -> Vec<String> {
		self.entries.read().keys().cloned().collect()
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

impl Storage for MemoryStorage {
	fn apply_batch(&self, batch: &[Operation]) -> Result<(), StorageError> {
		let injected = self
			.failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if injected {
			return Err(StorageError::Io(io::Error::other("injected batch failure")));
		}

		let mut entries = self.entries.write();
		for op in batch {
			match op {
				Operation::Set { key, value } => {
					entries.insert(key.clone(), value.clone());
				}
				Operation::Delete { key } => {
					entries.remove(key);
				}
			}
		}
		Ok(())
	}

	fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
		Ok(self.entries.read().get(key).cloned())
	}

	fn iterate_all(
		&self,
		visit: &mut dyn FnMut(&str, &[u8]) -> bool,
	) -> Result<(), StorageError> {
		let snapshot: Vec<(String, Bytes)> = self
			.entries
			.read()
			.iter()
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();

		for (key, value) in snapshot {
			if !visit(&key, &value) {
				break;
			}
		}
		Ok(())
	}
}
