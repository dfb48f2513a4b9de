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

use common::ServiceStream;
use futures::StreamExt;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::{
	endpoint::EndpointInner,
	envelope::Envelope,
	error::RpcError,
	marker::StatusCode,
	metrics::RPC_METRICS,
	middleware::{CallContext, Direction},
	registry::{HandlerContext, HandlerReply, MethodKind},
};

/// Sentinel reply sent when a handler turns out to be streaming: the caller
/// resolves its request future and reads the stream separately.
const STREAM_STARTED: &str = "Stream started";

/// Inbound request: resolve the method, invoke the handler, adapt the
/// result, and always leave the peer with a terminal status.
pub(crate) async fn handle_request(inner: Arc<EndpointInner>, envelope: Envelope) {
	let id = envelope.id.clone();
	let ctx = CallContext {
		id: id.clone(),
		header_metadata: envelope.header_metadata.clone(),
		trailer_metadata: envelope.trailer_metadata.clone(),
	};
	let (Some(service), Some(method)) = (envelope.service.clone(), envelope.method.clone())
	else {
		let error = RpcError::Argument("request is missing service or method".to_string());
		report_failure(&inner, &id, None, None, &ctx, error).await;
		return;
	};
	let Some(descriptor) = inner.registry.find(&service, &method) else {
		let error = RpcError::Status {
			code: StatusCode::NotFound,
			message: format!("Method not found: {service}.{method}"),
			details: None,
		};
		report_failure(&inner, &id, Some(&service), Some(&method), &ctx, error).await;
		return;
	};
	RPC_METRICS.requests_served_total.with_label_values([service.as_str(), method.as_str()]).inc();
	let (payload, ctx) = inner
		.middleware
		.apply_request(&service, &method, envelope.payload, ctx, Direction::FromRemote)
		.await;
	// Client-streaming and bidirectional handlers read their request stream
	// through the context; the sink must exist before any stream data for
	// this id arrives.
	let inbound = match descriptor.kind {
		MethodKind::ClientStream | MethodKind::Bidi => {
			inner.streams.get_or_create(&id, Some(service.as_str()), Some(method.as_str()));
			inner.streams.take_reader(&id)
		},
		MethodKind::Unary | MethodKind::ServerStream => None,
	};
	let handler_ctx = HandlerContext {
		id: id.clone(),
		service: service.clone(),
		method: method.clone(),
		payload,
		header_metadata: ctx.header_metadata.clone(),
		trailer_metadata: ctx.trailer_metadata.clone(),
		deadline_epoch_ms: inner.deadline_for(&id),
		inbound,
	};
	match descriptor.invoke(handler_ctx).await {
		Ok(HandlerReply::Scalar(value)) => {
			let (value, _ctx) = inner
				.middleware
				.apply_response(Some(&service), Some(&method), value, ctx.clone(), Direction::ToRemote)
				.await;
			if let Err(error) = inner.send_envelope(Envelope::response(&id, value)).await {
				warn!(request_id = %id, error = %error, "failed to send response");
				return;
			}
			if let Err(error) = inner.emit_status(&id, StatusCode::Ok, "OK", None).await {
				warn!(request_id = %id, error = %error, "failed to send terminal status");
			}
		},
		Ok(HandlerReply::Stream(source)) => {
			if let Err(error) =
				inner.send_envelope(Envelope::response(&id, json!(STREAM_STARTED))).await
			{
				warn!(request_id = %id, error = %error, "failed to send stream-started response");
				return;
			}
			deliver_stream(&inner, &id, &service, &method, &ctx, source).await;
		},
		Err(error) => {
			report_failure(&inner, &id, Some(&service), Some(&method), &ctx, error).await;
		},
	}
}

/// Pulls the handler's source and ships every item, ending with either
/// `STREAM_END Status(OK)` or `ERROR Status(code)`.
async fn deliver_stream(
	inner: &Arc<EndpointInner>,
	id: &str,
	service: &str,
	method: &str,
	ctx: &CallContext,
	mut source: ServiceStream<Result<JsonValue, RpcError>>,
) {
	while let Some(item) = source.next().await {
		match item {
			Ok(value) => {
				let (value, _ctx) = inner
					.middleware
					.apply_stream_data(
						Some(service),
						Some(method),
						value,
						ctx.clone(),
						Direction::ToRemote,
					)
					.await;
				let envelope = Envelope::stream_data(
					id,
					Some(service.to_string()),
					Some(method.to_string()),
					value,
				);
				if let Err(error) = inner.send_envelope(envelope).await {
					warn!(request_id = %id, error = %error, "failed to send stream item, aborting delivery");
					return;
				}
				RPC_METRICS.stream_items_sent_total.inc();
			},
			Err(error) => {
				report_failure(inner, id, Some(service), Some(method), ctx, error).await;
				return;
			},
		}
	}
	if let Err(error) = inner.send_envelope(Envelope::stream_end(id)).await {
		warn!(request_id = %id, error = %error, "failed to send stream end");
		return;
	}
	if let Err(error) = inner.emit_status(id, StatusCode::Ok, "OK", None).await {
		warn!(request_id = %id, error = %error, "failed to send terminal status");
	}
}

fn error_message(error: &RpcError) -> String {
	match error {
		RpcError::Status { message, .. } => message.clone(),
		other => other.to_string(),
	}
}

/// Failure epilogue shared by every request-path error: on_error hook,
/// legacy error envelope plus terminal status, and sink closure.
async fn report_failure(
	inner: &Arc<EndpointInner>,
	id: &str,
	service: Option<&str>,
	method: Option<&str>,
	ctx: &CallContext,
	error: RpcError,
) {
	inner
		.middleware
		.apply_error(service, method, &error, ctx, Direction::ToRemote)
		.await;
	let message = error_message(&error);
	let details = json!({
		"error": message,
		"stackTrace": format!("{error:?}"),
	});
	if let Err(send_error) =
		inner.emit_status(id, error.code(), &message, Some(details)).await
	{
		warn!(request_id = %id, error = %send_error, "failed to report request failure");
	}
	if let Some(sink) = inner.streams.get(id) {
		sink.push_error(error);
	}
}
