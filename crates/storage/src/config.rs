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

use std::time::Duration;

/// Default interval between background compactions (seconds)
pub const DEFAULT_COMPACTION_INTERVAL_SECS: u64 = 30 * 60;

/// Configuration for the storage engine
#[derive(Debug, Clone)]
pub struct StorageConfig {
	/// Interval between background compactions; zero disables the compactor
	pub compaction_interval: Duration,
	/// Fsync every batch before returning from `apply_batch`
	pub sync_writes: bool,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			compaction_interval: Duration::from_secs(DEFAULT_COMPACTION_INTERVAL_SECS),
			sync_writes: true,
		}
	}
}

impl StorageConfig {
	pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
		self.compaction_interval = interval;
		self
	}
}
