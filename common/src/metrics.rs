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

use std::collections::HashMap;

use prometheus::Opts;
pub use prometheus::{
	Histogram, HistogramTimer, IntCounter, IntCounterVec as PrometheusIntCounterVec, IntGauge,
};

#[derive(Clone)]
pub struct IntCounterVec<const N: usize> {
	underlying: PrometheusIntCounterVec,
}

impl<const N: usize> IntCounterVec<N> {
	pub fn with_label_values(&self, label_values: [&str; N]) -> IntCounter {
		self.underlying.with_label_values(&label_values)
	}
}

pub fn new_counter(name: &str, description: &str, namespace: &str) -> IntCounter {
	let counter_opts = Opts::new(name, description).namespace(namespace);
	let counter = IntCounter::with_opts(counter_opts).expect("Failed to create counter");
	prometheus::register(Box::new(counter.clone())).expect("Failed to register counter");
	counter
}

pub fn new_counter_vec<const N: usize>(
	name: &str,
	help: &str,
	namespace: &str,
	subsystem: &str,
	label_names: [&str; N],
) -> IntCounterVec<N> {
	let counter_opts = Opts::new(name, help)
		.namespace(namespace)
		.subsystem(subsystem)
		.const_labels(HashMap::new());
	let underlying = PrometheusIntCounterVec::new(counter_opts, &label_names)
		.expect("failed to create counter vec");
	prometheus::register(Box::new(underlying.clone())).expect("failed to register counter vec");
	IntCounterVec { underlying }
}

pub fn new_gauge(name: &str, description: &str, namespace: &str) -> IntGauge {
	let gauge_opts = Opts::new(name, description).namespace(namespace);
	let gauge = IntGauge::with_opts(gauge_opts).expect("Failed to create gauge");
	prometheus::register(Box::new(gauge.clone())).expect("Failed to register gauge");
	gauge
}

#[cfg(test)]
mod tests {
	use super::{new_counter, new_counter_vec};

	#[test]
	fn test_counter_vec_labels() {
		let counter_vec = new_counter_vec::<2>(
			"test_rpc_counter_vec",
			"help for test_rpc_counter_vec",
			"querent",
			"rpc",
			["service", "method"],
		);
		counter_vec.with_label_values(["calc", "add"]).inc();
		counter_vec.with_label_values(["calc", "add"]).inc();
		assert_eq!(counter_vec.with_label_values(["calc", "add"]).get(), 2);
	}

	#[test]
	fn test_counter() {
		let counter = new_counter("test_rpc_counter", "help for test_rpc_counter", "querent");
		counter.inc();
		assert_eq!(counter.get(), 1);
	}
}
