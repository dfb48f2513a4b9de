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

use common::metrics::{new_counter, new_counter_vec, IntCounter, IntCounterVec};
use once_cell::sync::Lazy;

pub struct RpcMetrics {
	pub inbound_frames_total: IntCounter,
	pub dropped_frames_total: IntCounter,
	pub requests_served_total: IntCounterVec<2>,
	pub stream_items_recv_total: IntCounter,
	pub stream_items_sent_total: IntCounter,
	pub pings_total: IntCounter,
	pub slots_completed_total: IntCounter,
	pub slots_failed_total: IntCounter,
}

impl Default for RpcMetrics {
	fn default() -> Self {
		RpcMetrics {
			inbound_frames_total: new_counter(
				"inbound_frames_total",
				"Total number of frames decoded from the transport.",
				"rpc",
			),
			dropped_frames_total: new_counter(
				"dropped_frames_total",
				"Total number of inbound frames dropped (decode failure, unknown kind, or missing stream).",
				"rpc",
			),
			requests_served_total: new_counter_vec(
				"requests_served_total",
				"Total number of inbound requests dispatched to a handler.",
				"rpc",
				"",
				["service", "method"],
			),
			stream_items_recv_total: new_counter(
				"stream_items_recv_total",
				"Total number of stream data items delivered to local sinks.",
				"rpc",
			),
			stream_items_sent_total: new_counter(
				"stream_items_sent_total",
				"Total number of stream data items sent to the peer.",
				"rpc",
			),
			pings_total: new_counter(
				"pings_total",
				"Total number of ping markers answered or issued.",
				"rpc",
			),
			slots_completed_total: new_counter(
				"slots_completed_total",
				"Total number of request slots resolved with a value.",
				"rpc",
			),
			slots_failed_total: new_counter(
				"slots_failed_total",
				"Total number of request slots resolved with an error.",
				"rpc",
			),
		}
	}
}

pub static RPC_METRICS: Lazy<RpcMetrics> = Lazy::new(RpcMetrics::default);
