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

use std::{path::PathBuf, time::Duration};

use anvil_storage::{StorageConfig, config::DEFAULT_COMPACTION_INTERVAL_SECS};
use serde::Deserialize;

/// Default log level (can be overridden by RUST_LOG environment variable)
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log subdirectory and file prefix
pub const LOG_COMPONENT_NAME: &str = "broker";

/// Default console output enabled (can be overridden by LOG_TO_CONSOLE environment variable)
pub const DEFAULT_LOG_TO_CONSOLE: bool = false;

/// Default metadata store directory
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Virtual host created when none is configured
pub const DEFAULT_VIRTUAL_HOST: &str = "/";

const ENV_PREFIX: &str = "BROKER";

/// Broker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
	/// Directory holding the metadata store
	pub data_dir: PathBuf,
	/// Seconds between background compactions; 0 disables them
	pub compaction_interval_secs: u64,
	/// Virtual hosts to create at start-up
	pub virtual_hosts: Vec<String>,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from(DEFAULT_DATA_DIR),
			compaction_interval_secs: DEFAULT_COMPACTION_INTERVAL_SECS,
			virtual_hosts: vec![DEFAULT_VIRTUAL_HOST.to_string()],
		}
	}
}

impl BrokerConfig {
	/// Load configuration from environment variables
	///
	/// `BROKER_VIRTUAL_HOSTS` is a comma-separated list.
	pub fn from_env() -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(environment())
			.build()?;

		cfg.try_deserialize()
	}

	/// Load configuration from file, with environment variables on top
	pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::File::with_name(path))
			.add_source(environment())
			.build()?;

		cfg.try_deserialize()
	}

	pub fn storage_config(&self) -> StorageConfig {
		StorageConfig::default()
			.with_compaction_interval(Duration::from_secs(self.compaction_interval_secs))
	}
}

fn environment() -> config::Environment {
	config::Environment::with_prefix(ENV_PREFIX)
		.try_parsing(true)
		.list_separator(",")
		.with_list_parse_key("virtual_hosts")
}
