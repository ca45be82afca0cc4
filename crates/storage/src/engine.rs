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
	fs::{self, File, OpenOptions},
	io::{Read, Write},
	path::{Path, PathBuf},
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Instant,
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
	Operation, Storage, StorageError,
	compactor::Compactor,
	config::StorageConfig,
	frame::{self, FrameError},
};

/// Name of the data file inside the storage directory
pub const DATA_FILE_NAME: &str = "anvil.db";

const COMPACT_FILE_NAME: &str = "anvil.db.compact";

/// Keys written per frame when rewriting the log
const COMPACTION_CHUNK: usize = 1024;

/// Outcome of one compaction run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
	pub keys: usize,
	pub before_bytes: u64,
	pub after_bytes: u64,
}

/// Append handle on the data file plus its committed length
struct LogWriter {
	file: File,
	len: u64,
	/// Set when a failed append could not be cut back; the file then ends in
	/// bytes that are not a committed frame
	poisoned: bool,
}

impl LogWriter {
	fn new(file: File, len: u64) -> Self {
		Self {
			file,
			len,
			poisoned: false,
		}
	}

	/// Append one frame; on failure the file is cut back to the last commit
	///
	/// If that cut fails, every later append is refused until the store is
	/// reopened or compacted.
	fn append(&mut self, frame: &[u8], sync: bool) -> Result<(), StorageError> {
		if self.poisoned {
			return Err(StorageError::Corrupted(format!(
				"data file has an uncommitted tail after byte {}",
				self.len
			)));
		}

		let result = self.file.write_all(frame).and_then(|_| {
			if sync {
				self.file.sync_data()
			} else {
				Ok(())
			}
		});

		match result {
			Ok(()) => {
				self.len += frame.len() as u64;
				Ok(())
			}
			Err(e) => {
				if let Err(rollback) = self.file.set_len(self.len) {
					self.poisoned = true;
					error!(
						target: "storage",
						committed_len = self.len,
						error = %rollback,
						"Failed to truncate partial frame, refusing further writes"
					);
				}
				Err(StorageError::Io(e))
			}
		}
	}
}

/// State shared between the engine handle and the compactor thread
pub(crate) struct EngineCore {
	dir: PathBuf,
	data_path: PathBuf,
	sync_writes: bool,
	closed: AtomicBool,
	/// Committed key set; only written while `writer` is held
	index: RwLock<BTreeMap<String, Bytes>>,
	/// Serialises commits and compaction; `None` once closed
	writer: Mutex<Option<LogWriter>>,
}

impl EngineCore {
	fn ensure_open(&self) -> Result<(), StorageError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(StorageError::Closed);
		}
		Ok(())
	}

	fn apply_batch(&self, batch: &[Operation]) -> Result<(), StorageError> {
		self.ensure_open()?;
		if batch.is_empty() {
			return Ok(());
		}

		let frame = frame::encode_batch(batch);

		let mut guard = self.writer.lock();
		let writer = guard.as_mut().ok_or(StorageError::Closed)?;
		writer.append(&frame, self.sync_writes)?;

		let mut index = self.index.write();
		apply_to_index(&mut index, batch.iter().cloned());

		debug!(
			target: "storage",
			ops = batch.len(),
			frame_bytes = frame.len(),
			"Batch committed"
		);
		Ok(())
	}

	fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
		self.ensure_open()?;
		Ok(self.index.read().get(key).cloned())
	}

	fn snapshot(&self) -> Result<Vec<(String, Bytes)>, StorageError> {
		self.ensure_open()?;
		let index = self.index.read();
		Ok(index.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
	}

	/// Rewrite the live key set into a fresh data file
	///
	/// Holds the writer lock for the whole run, so commits wait while reads
	/// keep being served from the index.
	pub(crate) fn compact(&self) -> Result<CompactionStats, StorageError> {
		self.ensure_open()?;

		let mut guard = self.writer.lock();
		let writer = guard.as_mut().ok_or(StorageError::Closed)?;
		let before_bytes = writer.len;

		let live: Vec<Operation> = {
			let index = self.index.read();
			index
				.iter()
				.map(|(k, v)| Operation::set(k.clone(), v.clone()))
				.collect()
		};

		let tmp_path = self.dir.join(COMPACT_FILE_NAME);
		remove_if_exists(&tmp_path)?;

		let written = (|| {
			let mut out = OpenOptions::new()
				.create_new(true)
				.read(true)
				.append(true)
				.open(&tmp_path)?;

			let mut after_bytes = 0u64;
			for chunk in live.chunks(COMPACTION_CHUNK) {
				let frame = frame::encode_batch(chunk);
				out.write_all(&frame)?;
				after_bytes += frame.len() as u64;
			}
			out.sync_all()?;
			fs::rename(&tmp_path, &self.data_path)?;
			Ok::<_, std::io::Error>((out, after_bytes))
		})();

		let (file, after_bytes) = match written {
			Ok(written) => written,
			Err(e) => {
				let _ = fs::remove_file(&tmp_path);
				return Err(StorageError::Io(e));
			}
		};

		// The new handle follows the renamed inode
		*writer = LogWriter::new(file, after_bytes);

		if let Err(e) = sync_dir(&self.dir) {
			warn!(target: "storage", error = %e, "Failed to sync storage directory after compaction");
		}

		Ok(CompactionStats {
			keys: live.len(),
			before_bytes,
			after_bytes,
		})
	}

	fn close(&self) -> Result<(), StorageError> {
		let mut guard = self.writer.lock();
		self.closed.store(true, Ordering::Release);

		match guard.take() {
			Some(writer) => {
				writer.file.sync_all()?;
				info!(target: "storage", path = %self.data_path.display(), "Storage closed");
				Ok(())
			}
			None => Ok(()),
		}
	}
}

/// Storage engine backed by an append-only, checksummed data file
///
/// Each committed batch is one frame on disk and is fsynced before it
/// becomes visible to readers. Opening replays the log into an in-memory
/// ordered index; a torn or corrupt final frame (crash mid-write) is cut
/// off, so a batch is either fully present after restart or not at all. A
/// damaged frame with committed data after it fails the open instead.
///
/// A background [`Compactor`] rewrites the log on a fixed interval to drop
/// overwritten and deleted entries.
pub struct StorageEngine {
	core: Arc<EngineCore>,
	compactor: Mutex<Option<Compactor>>,
}

impl StorageEngine {
	/// Open or create the store in directory `path`
	///
	/// Any failure here leaves the broker without its metadata; callers are
	/// expected to abort start-up.
	pub fn open(path: impl AsRef<Path>, config: StorageConfig) -> Result<Self, StorageError> {
		let start = Instant::now();
		let dir = path.as_ref().to_path_buf();
		fs::create_dir_all(&dir)?;

		// Leftover from a compaction interrupted before its rename
		remove_if_exists(&dir.join(COMPACT_FILE_NAME))?;

		let data_path = dir.join(DATA_FILE_NAME);
		let mut file = OpenOptions::new()
			.create(true)
			.read(true)
			.append(true)
			.open(&data_path)?;

		let mut contents = Vec::new();
		file.read_to_end(&mut contents)?;

		let (index, valid_len) = replay(&contents)?;
		if valid_len < contents.len() {
			warn!(
				target: "storage",
				valid_bytes = valid_len,
				discarded_bytes = contents.len() - valid_len,
				"Truncating incomplete tail of data file"
			);
			file.set_len(valid_len as u64)?;
			file.sync_all()?;
		}

		info!(
			target: "storage",
			path = %data_path.display(),
			keys = index.len(),
			bytes = valid_len,
			open_ms = start.elapsed().as_millis(),
			"Storage opened"
		);

		let core = Arc::new(EngineCore {
			dir,
			data_path,
			sync_writes: config.sync_writes,
			closed: AtomicBool::new(false),
			index: RwLock::new(index),
			writer: Mutex::new(Some(LogWriter::new(file, valid_len as u64))),
		});

		let compactor = if config.compaction_interval.is_zero() {
			None
		} else {
			Some(Compactor::start(core.clone(), config.compaction_interval)?)
		};

		Ok(Self {
			core,
			compactor: Mutex::new(compactor),
		})
	}

	/// Run a compaction now, independent of the background schedule
	pub fn compact(&self) -> Result<CompactionStats, StorageError> {
		self.core.compact()
	}

	/// Number of live keys
	pub fn len(&self) -> usize {
		self.core.index.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Current size of the data file in bytes
	pub fn size_on_disk(&self) -> u64 {
		self.core
			.writer
			.lock()
			.as_ref()
			.map(|w| w.len)
			.unwrap_or(0)
	}

	/// Stop the compactor, flush and release the data file
	///
	/// A compaction in progress is allowed to finish first. Calling this
	/// again is a no-op.
	pub fn close(&self) -> Result<(), StorageError> {
		if let Some(compactor) = self.compactor.lock().take() {
			compactor.shutdown();
		}
		self.core.close()
	}
}

impl Storage for StorageEngine {
	fn apply_batch(&self, batch: &[Operation]) -> Result<(), StorageError> {
		self.core.apply_batch(batch)
	}

	fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
		self.core.get(key)
	}

	fn iterate_all(
		&self,
		visit: &mut dyn FnMut(&str, &[u8]) -> bool,
	) -> Result<(), StorageError> {
		// Visit a snapshot so the visitor may call back into the engine
		for (key, value) in self.core.snapshot()? {
			if !visit(&key, &value) {
				break;
			}
		}
		Ok(())
	}
}

impl Drop for StorageEngine {
	fn drop(&mut self) {
		if let Err(e) = self.close() {
			warn!(target: "storage", error = %e, "Failed to close storage on drop");
		}
	}
}

/// Rebuild the index from raw log bytes, returning it with the length of
/// the valid prefix
///
/// Only the final frame may be invalid. Anything after an invalid frame is
/// committed data, so that case is reported as corruption.
fn replay(contents: &[u8]) -> Result<(BTreeMap<String, Bytes>, usize), StorageError> {
	let mut index = BTreeMap::new();
	let mut offset = 0usize;
	let mut frames = 0usize;

	loop {
		match frame::decode_frame(&contents[offset..]) {
			Ok(Some((batch, consumed))) => {
				apply_to_index(&mut index, batch.into_iter());
				offset += consumed;
				frames += 1;
			}
			Ok(None) => break,
			Err(e) => {
				let remaining = &contents[offset..];
				let is_tail = match e {
					FrameError::Torn { .. } => true,
					_ => frame::declared_len(remaining).is_none_or(|len| len >= remaining.len()),
				};

				if !is_tail {
					error!(
						target: "storage",
						offset = offset,
						frames_replayed = frames,
						error = %e,
						"Invalid frame followed by committed data"
					);
					return Err(StorageError::Corrupted(format!(
						"invalid frame at byte {} of {}: {}",
						offset,
						contents.len(),
						e
					)));
				}

				warn!(
					target: "storage",
					offset = offset,
					frames_replayed = frames,
					error = %e,
					"Stopping replay at invalid final frame"
				);
				break;
			}
		}
	}

	Ok((index, offset))
}

fn apply_to_index(index: &mut BTreeMap<String, Bytes>, batch: impl Iterator<Item = Operation>) {
	for op in batch {
		match op {
			Operation::Set { key, value } => {
				index.insert(key, value);
			}
			Operation::Delete { key } => {
				index.remove(&key);
			}
		}
	}
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
	match fs::remove_file(path) {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(StorageError::Io(e)),
	}
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
	File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
	Ok(())
}
