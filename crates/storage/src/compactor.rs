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
	sync::Arc,
	thread::{self, JoinHandle},
	time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{error, info, warn};

use crate::{StorageError, engine::EngineCore};

/// Compactor - periodically reclaims space in the data file
///
/// The Compactor runs in a dedicated thread and triggers a compaction on a
/// fixed interval, independent of request traffic.
///
/// Design principles:
/// - Never triggered by write volume
/// - A failed run is logged and retried on the next tick
/// - A run in progress is never interrupted; shutdown waits for it
pub struct Compactor {
	thread_handle: Option<JoinHandle<()>>,
	/// Dropping the sender wakes the loop and stops it
	shutdown: Option<Sender<()>>,
}

impl Compactor {
	pub(crate) fn start(core: Arc<EngineCore>, interval: Duration) -> Result<Self, StorageError> {
		let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

		let thread_handle = thread::Builder::new()
			.name("storage-compactor".to_string())
			.spawn(move || {
				info!(
					target: "compactor",
					interval_secs = interval.as_secs(),
					"Compactor started"
				);
				Self::run_compaction_loop(core.as_ref(), interval, &shutdown_rx);
				info!(target: "compactor", "Compactor stopped");
			})?;

		Ok(Self {
			thread_handle: Some(thread_handle),
			shutdown: Some(shutdown_tx),
		})
	}

	fn run_compaction_loop(core: &EngineCore, interval: Duration, shutdown: &Receiver<()>) {
		let ticker = channel::tick(interval);

		loop {
			crossbeam::select! {
				recv(shutdown) -> _ => break,
				recv(ticker) -> _ => {}
			}

			let start = Instant::now();
			match core.compact() {
				Ok(stats) => {
					info!(
						target: "compactor",
						keys = stats.keys,
						before_bytes = stats.before_bytes,
						after_bytes = stats.after_bytes,
						compact_ms = start.elapsed().as_millis(),
						"Compaction finished"
					);
				}
				Err(StorageError::Closed) => break,
				Err(e) => {
					error!(
						target: "compactor",
						error = %e,
						"Compaction failed, retrying on next interval"
					);
				}
			}
		}
	}

	pub fn shutdown(mut self) {
		self.stop();
	}

	fn stop(&mut self) {
		drop(self.shutdown.take());

		if let Some(handle) = self.thread_handle.take()
			&& let Err(e) = handle.join()
		{
			warn!(target: "compactor", error = ?e, "Compactor thread panicked");
		}
	}
}

impl Drop for Compactor {
	fn drop(&mut self) {
		self.stop();
	}
}
