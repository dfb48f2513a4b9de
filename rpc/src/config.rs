// Copyright (C) 2023 QuerentAI LLC.
// This file is part of Querent.

// The Licensed Work is licensed under the Business Source License 1.1 (BSL 1.1).
// You may use this file in compliance with the BSL 1.1, subject to the following restrictions:
// 1. You may not use the Licensed Work for AI-related services, database services,
//    or any service or product offering that provides database, big data, or analytics
//    services to third parties unless explicitly authorized by QuerentAI LLC.
// 2. For more details, see the LICENSE file or visit https://mariadb.com/bsl11/.

// For inquiries about alternative licensing arrangements, please contact contact@querent.xyz.

// The Licensed Work is provided "AS IS", WITHOUT WARRANTY OF ANY KIND, express or implied,
// including but not limited to the warranties of merchantability, fitness for a particular purpose,
// and non-infringement. See the Business Source License for more details.

// This software includes code developed by QuerentAI LLC (https://querent.xyz).

use std::num::NonZeroU64;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{info, warn};

use crate::stream_table::QueueCapacity;

/// Default ping timeout applied when `send_ping` is called without one.
pub static DEFAULT_PING_TIMEOUT: Lazy<Duration> = Lazy::new(ping_timeout_from_env_or_default);

/// Returns the default ping timeout:
/// - Derived from `QRPC_PING_TIMEOUT_SECS` if set and valid.
/// - Defaults to 30 seconds.
fn ping_timeout_from_env_or_default() -> Duration {
	match std::env::var("QRPC_PING_TIMEOUT_SECS") {
		Ok(ping_timeout_secs_str) => {
			if let Ok(ping_timeout_secs) = ping_timeout_secs_str.parse::<NonZeroU64>() {
				info!("set the default ping timeout to {ping_timeout_secs} seconds");
				return Duration::from_secs(ping_timeout_secs.get());
			} else {
				warn!(
					"failed to parse `QRPC_PING_TIMEOUT_SECS={ping_timeout_secs_str}` in \
                     seconds > 0, using default ping timeout (30 seconds)"
				);
			}
		},
		Err(std::env::VarError::NotUnicode(os_str)) => {
			warn!(
				"failed to parse `QRPC_PING_TIMEOUT_SECS={os_str:?}` in a valid unicode string, \
                 using default ping timeout (30 seconds)"
			);
		},
		Err(std::env::VarError::NotPresent) => {},
	}
	Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
	/// Timeout for `send_ping` when the caller does not pass one.
	#[serde(default = "default_ping_timeout_secs")]
	pub ping_timeout_secs: u64,
	/// Bound on each stream sink's delivery queue. `None` keeps the
	/// queues unbounded; a bounded sink sheds events when full.
	#[serde(default)]
	pub stream_channel_capacity: Option<usize>,
	/// Informational label stamped on every outbound envelope.
	#[serde(default)]
	pub debug_label: Option<String>,
}

fn default_ping_timeout_secs() -> u64 {
	DEFAULT_PING_TIMEOUT.as_secs()
}

impl Default for EndpointConfig {
	fn default() -> EndpointConfig {
		EndpointConfig {
			ping_timeout_secs: default_ping_timeout_secs(),
			stream_channel_capacity: None,
			debug_label: None,
		}
	}
}

impl EndpointConfig {
	pub fn ping_timeout(&self) -> Duration {
		Duration::from_secs(self.ping_timeout_secs)
	}

	pub fn stream_queue_capacity(&self) -> QueueCapacity {
		match self.stream_channel_capacity {
			Some(capacity) => QueueCapacity::Bounded(capacity),
			None => QueueCapacity::Unbounded,
		}
	}

	pub fn with_debug_label(mut self, debug_label: impl Into<String>) -> EndpointConfig {
		self.debug_label = Some(debug_label.into());
		self
	}
}

#[cfg(test)]
mod tests {
	use super::EndpointConfig;
	use crate::stream_table::QueueCapacity;

	#[test]
	fn test_config_defaults() {
		let config = EndpointConfig::default();
		assert_eq!(config.ping_timeout().as_secs(), 30);
		assert_eq!(config.stream_queue_capacity(), QueueCapacity::Unbounded);
		assert!(config.debug_label.is_none());
	}

	#[test]
	fn test_config_deserializes_with_defaults() {
		let config: EndpointConfig = serde_json::from_str("{}").unwrap();
		assert_eq!(config.ping_timeout_secs, 30);
		assert_eq!(config.stream_queue_capacity(), QueueCapacity::Unbounded);
		let config: EndpointConfig = serde_json::from_str(
			r#"{"ping_timeout_secs": 2, "stream_channel_capacity": 16, "debug_label": "edge"}"#,
		)
		.unwrap();
		assert_eq!(config.ping_timeout().as_secs(), 2);
		assert_eq!(config.stream_queue_capacity(), QueueCapacity::Bounded(16));
		assert_eq!(config.debug_label.as_deref(), Some("edge"));
	}
}
