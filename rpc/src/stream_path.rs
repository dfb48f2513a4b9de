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

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::{
	endpoint::{unix_epoch_ms, EndpointInner},
	envelope::Envelope,
	error::RpcError,
	marker::{ServiceMarker, StatusCode},
	metrics::RPC_METRICS,
	middleware::{CallContext, Direction},
	stream_table::{StreamEvent, StreamSink},
};

/// Inbound stream data: resolve the sink, interpret embedded markers,
/// deliver the rest in arrival order.
///
/// Markers that act on the request slot (status, pong, cancel, deadline)
/// are handled even when no sink exists for the id; plain data without a
/// sink is dropped.
pub(crate) async fn handle_stream_data(inner: &Arc<EndpointInner>, envelope: Envelope) {
	let sink = match inner.streams.get(&envelope.id) {
		Some(sink) => Some(sink),
		// A peer may begin streaming before the local side has taken
		// ownership; with service and method on the envelope a sink can
		// be created lazily.
		None if envelope.service.is_some() && envelope.method.is_some() =>
			Some(inner.streams.get_or_create(
				&envelope.id,
				envelope.service.as_deref(),
				envelope.method.as_deref(),
			)),
		None => None,
	};
	// Some codecs collapse an empty mapping to null on the wire.
	let payload = match envelope.payload.clone() {
		JsonValue::Null => JsonValue::Object(Map::new()),
		payload => payload,
	};
	match ServiceMarker::from_value(&payload) {
		Ok(Some(marker)) => handle_marker(inner, sink.as_ref(), &envelope, marker).await,
		Ok(None) => deliver_data(inner, sink.as_ref(), &envelope, payload).await,
		Err(error) => {
			// Degraded mode: a payload that claims to be a marker but does
			// not decode as one is delivered as plain data.
			warn!(stream_id = %envelope.id, error = %error, "malformed service marker, delivering as data");
			deliver_data(inner, sink.as_ref(), &envelope, payload).await;
		},
	}
}

async fn deliver_data(
	inner: &Arc<EndpointInner>,
	sink: Option<&StreamSink>,
	envelope: &Envelope,
	payload: JsonValue,
) {
	let Some(sink) = sink else {
		RPC_METRICS.dropped_frames_total.inc();
		debug!(stream_id = %envelope.id, "stream data for unknown stream, dropping");
		return;
	};
	let ctx = call_context(envelope);
	let (payload, _ctx) = inner
		.middleware
		.apply_stream_data(
			envelope.service.as_deref(),
			envelope.method.as_deref(),
			payload,
			ctx,
			Direction::FromRemote,
		)
		.await;
	if sink.push(StreamEvent::Data(payload)) {
		RPC_METRICS.stream_items_recv_total.inc();
	}
}

async fn handle_marker(
	inner: &Arc<EndpointInner>,
	sink: Option<&StreamSink>,
	envelope: &Envelope,
	marker: ServiceMarker,
) {
	let id = &envelope.id;
	match marker {
		ServiceMarker::ClientStreamEnd => {
			// Dual delivery: the hook observes the half-close AND raw
			// stream consumers see the marker.
			let ctx = call_context(envelope);
			inner
				.middleware
				.apply_stream_end(
					envelope.service.as_deref(),
					envelope.method.as_deref(),
					&ctx,
					Direction::FromRemote,
				)
				.await;
			if let Some(sink) = sink {
				sink.push(StreamEvent::Marker(ServiceMarker::ClientStreamEnd));
			}
		},
		ServiceMarker::Ping { timestamp } => {
			let pong = ServiceMarker::Pong {
				original_timestamp: timestamp,
				response_timestamp: unix_epoch_ms(),
			};
			RPC_METRICS.pings_total.inc();
			if let Err(error) = inner
				.send_envelope(Envelope::stream_data(id.clone(), None, None, pong.to_value()))
				.await
			{
				warn!(stream_id = %id, error = %error, "failed to answer in-stream ping");
			}
		},
		ServiceMarker::Pong { .. } => {
			inner.clear_deadline(id);
			inner.requests.complete(id, marker.to_value());
		},
		ServiceMarker::Status { code: StatusCode::Ok, .. } => {
			// An OK status is not terminal on the stream path; consumers
			// see it as a normal message.
			if let Some(sink) = sink {
				sink.push(StreamEvent::Marker(marker));
			}
		},
		ServiceMarker::Status { code, message, details } => {
			let error = RpcError::Status { code, message, details };
			let ctx = call_context(envelope);
			inner
				.middleware
				.apply_error(
					envelope.service.as_deref(),
					envelope.method.as_deref(),
					&error,
					&ctx,
					Direction::FromRemote,
				)
				.await;
			inner.terminate_operation(id, error).await;
		},
		ServiceMarker::Deadline { epoch_ms } => {
			if let Some(sink) = sink {
				sink.push(StreamEvent::Marker(ServiceMarker::Deadline { epoch_ms }));
			}
			if epoch_ms <= unix_epoch_ms() {
				inner.expire_operation(id).await;
			} else {
				inner.arm_deadline(id, epoch_ms);
			}
		},
		ServiceMarker::Cancel { ref operation_id, ref reason, .. } if operation_id == id => {
			let reason_text =
				reason.clone().unwrap_or_else(|| "operation cancelled".to_string());
			if let Err(error) =
				inner.emit_status(id, StatusCode::Cancelled, &reason_text, None).await
			{
				warn!(stream_id = %id, error = %error, "failed to acknowledge cancel");
			}
			inner
				.terminate_operation(
					id,
					RpcError::Status {
						code: StatusCode::Cancelled,
						message: reason_text,
						details: None,
					},
				)
				.await;
		},
		// A cancel naming another operation travels on: consumers decide
		// what it means for them.
		ServiceMarker::Cancel { .. } |
		ServiceMarker::ServerStreamEnd |
		ServiceMarker::ChannelClosed |
		ServiceMarker::Headers { .. } |
		ServiceMarker::Trailers { .. } |
		ServiceMarker::ClientStreamingInit { .. } |
		ServiceMarker::BidirectionalInit { .. } |
		ServiceMarker::HealthCheck |
		ServiceMarker::FlowControl |
		ServiceMarker::Compression => {
			if let Some(sink) = sink {
				sink.push(StreamEvent::Marker(marker));
			} else {
				debug!(stream_id = %id, "marker for unknown stream, dropping");
			}
		},
	}
}

fn call_context(envelope: &Envelope) -> CallContext {
	CallContext {
		id: envelope.id.clone(),
		header_metadata: envelope.header_metadata.clone(),
		trailer_metadata: envelope.trailer_metadata.clone(),
	}
}
