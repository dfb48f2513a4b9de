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

use tracing::{debug, warn};

use crate::{
	endpoint::{unix_epoch_ms, EndpointInner},
	envelope::{Envelope, EnvelopeKind},
	error::RpcError,
	marker::{ServiceMarker, StatusCode},
	metrics::RPC_METRICS,
	middleware::{CallContext, Direction},
	request_path, stream_path,
};

/// Routes one decoded inbound envelope. Stateless: every effect goes
/// through the endpoint's tables and send primitive.
pub(crate) async fn dispatch(inner: &Arc<EndpointInner>, envelope: Envelope) {
	match envelope.kind {
		EnvelopeKind::Request => {
			// Handlers may suspend on their own rpc traffic; they must not
			// block the pump.
			tokio::spawn(request_path::handle_request(inner.clone(), envelope));
		},
		EnvelopeKind::Response => handle_response(inner, envelope).await,
		EnvelopeKind::StreamData => stream_path::handle_stream_data(inner, envelope).await,
		EnvelopeKind::StreamEnd => handle_stream_end(inner, envelope).await,
		EnvelopeKind::Error => handle_error(inner, envelope).await,
		EnvelopeKind::Ping => handle_ping(inner, envelope).await,
		EnvelopeKind::Pong => {
			inner.clear_deadline(&envelope.id);
			inner.requests.complete(&envelope.id, envelope.payload);
		},
		EnvelopeKind::Unknown => {
			RPC_METRICS.dropped_frames_total.inc();
			debug!(envelope_id = %envelope.id, "unknown envelope kind, dropping");
		},
	}
}

async fn handle_response(inner: &Arc<EndpointInner>, envelope: Envelope) {
	let ctx = CallContext {
		id: envelope.id.clone(),
		header_metadata: envelope.header_metadata,
		trailer_metadata: envelope.trailer_metadata,
	};
	let (payload, _ctx) = inner
		.middleware
		.apply_response(
			envelope.service.as_deref(),
			envelope.method.as_deref(),
			envelope.payload,
			ctx,
			Direction::FromRemote,
		)
		.await;
	inner.clear_deadline(&envelope.id);
	inner.requests.complete(&envelope.id, payload);
}

async fn handle_stream_end(inner: &Arc<EndpointInner>, envelope: Envelope) {
	let ctx = CallContext {
		id: envelope.id.clone(),
		header_metadata: envelope.header_metadata,
		trailer_metadata: envelope.trailer_metadata,
	};
	inner
		.middleware
		.apply_stream_end(
			envelope.service.as_deref(),
			envelope.method.as_deref(),
			&ctx,
			Direction::FromRemote,
		)
		.await;
	match inner.streams.get(&envelope.id) {
		Some(sink) => {
			sink.close();
		},
		None => {
			debug!(stream_id = %envelope.id, "stream end for unknown stream, dropping");
		},
	}
}

async fn handle_error(inner: &Arc<EndpointInner>, envelope: Envelope) {
	let (message, code_name) = envelope.error_payload();
	let code = code_name
		.as_deref()
		.and_then(StatusCode::from_name)
		.unwrap_or(StatusCode::Unknown);
	let error = RpcError::Status { code, message, details: None };
	let ctx = CallContext {
		id: envelope.id.clone(),
		header_metadata: envelope.header_metadata,
		trailer_metadata: envelope.trailer_metadata,
	};
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
	inner.terminate_operation(&envelope.id, error).await;
}

/// Replies with a pong echoing payload, id and headers.
async fn handle_ping(inner: &Arc<EndpointInner>, envelope: Envelope) {
	let pong_payload = match ServiceMarker::from_value(&envelope.payload) {
		Ok(Some(ServiceMarker::Ping { timestamp })) => ServiceMarker::Pong {
			original_timestamp: timestamp,
			response_timestamp: unix_epoch_ms(),
		}
		.to_value(),
		_ => envelope.payload.clone(),
	};
	RPC_METRICS.pings_total.inc();
	let pong =
		Envelope::pong(&envelope.id, pong_payload).with_header_metadata(envelope.header_metadata);
	if let Err(error) = inner.send_envelope(pong).await {
		warn!(envelope_id = %envelope.id, error = %error, "failed to send pong");
	}
}
