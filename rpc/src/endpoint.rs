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

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
	time::{Instant, SystemTime, UNIX_EPOCH},
};

use common::new_quid;
use futures::StreamExt;
use serde_json::{Map, Value as JsonValue};
use tokio::{task::JoinHandle, time::Duration};
use tracing::{debug, info, warn};

use crate::{
	codec::Codec,
	config::EndpointConfig,
	dispatcher,
	envelope::Envelope,
	error::RpcError,
	marker::{ServiceMarker, StatusCode},
	metrics::RPC_METRICS,
	middleware::{CallContext, Direction, Middleware, MiddlewareChain},
	registry::{MethodDescriptor, MethodRegistry},
	request_table::{PendingReply, RequestTable},
	stream_table::{StreamReader, StreamTable},
	transport::Transport,
};

pub(crate) fn unix_epoch_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// The rpc endpoint: one engine per transport link.
///
/// Lightweight to clone; all clones share the same tables and pump task.
#[derive(Clone)]
pub struct Endpoint {
	inner: Arc<EndpointInner>,
}

/// Caller-side handle on a stream opened with [`Endpoint::open_stream`].
pub struct OpenedStream {
	pub stream_id: String,
	pub reply: PendingReply,
	pub events: StreamReader,
}

pub(crate) struct EndpointInner {
	pub(crate) config: EndpointConfig,
	transport: Arc<dyn Transport>,
	codec: Arc<dyn Codec>,
	pub(crate) requests: RequestTable,
	pub(crate) streams: StreamTable,
	pub(crate) middleware: MiddlewareChain,
	pub(crate) registry: MethodRegistry,
	deadlines: Mutex<HashMap<String, DeadlineTimer>>,
	pump: Mutex<Option<JoinHandle<()>>>,
	closed: AtomicBool,
}

struct DeadlineTimer {
	epoch_ms: u64,
	handle: JoinHandle<()>,
}

impl Endpoint {
	pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn Codec>) -> Endpoint {
		Endpoint::with_config(transport, codec, EndpointConfig::default())
	}

	pub fn with_config(
		transport: Arc<dyn Transport>,
		codec: Arc<dyn Codec>,
		config: EndpointConfig,
	) -> Endpoint {
		let streams = StreamTable::with_capacity(config.stream_queue_capacity());
		let inner = Arc::new(EndpointInner {
			config,
			transport,
			codec,
			requests: RequestTable::default(),
			streams,
			middleware: MiddlewareChain::default(),
			registry: MethodRegistry::default(),
			deadlines: Mutex::default(),
			pump: Mutex::default(),
			closed: AtomicBool::new(false),
		});
		let pump = spawn_pump(&inner);
		*inner.pump.lock().unwrap() = Some(pump);
		Endpoint { inner }
	}

	pub fn register_method(&self, descriptor: MethodDescriptor) -> bool {
		self.inner.registry.register(descriptor)
	}

	pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
		self.inner.middleware.push(middleware);
	}

	/// Sorted `(service, method)` pairs currently registered.
	pub fn registered_methods(&self) -> Vec<(String, String)> {
		let mut methods: Vec<(String, String)> = self
			.inner
			.registry
			.all()
			.into_iter()
			.map(|descriptor| (descriptor.service, descriptor.method))
			.collect();
		methods.sort();
		methods
	}

	pub fn is_available(&self) -> bool {
		!self.inner.is_closed() && self.inner.transport.is_available()
	}

	/// Issues a unary (or client-stream finalizing) call.
	///
	/// Returns the pending reply future. With a timeout, a `Deadline`
	/// marker is sent to the peer and a local timer is armed; whichever
	/// side fires first wins.
	pub async fn invoke(
		&self,
		service: &str,
		method: &str,
		request: JsonValue,
		timeout: Option<Duration>,
		metadata: Option<Map<String, JsonValue>>,
	) -> Result<PendingReply, RpcError> {
		self.ensure_open()?;
		let id = new_quid("req");
		let reply = self.inner.requests.register(&id);
		let ctx = CallContext {
			id: id.clone(),
			header_metadata: metadata.unwrap_or_default(),
			trailer_metadata: Map::new(),
		};
		let (payload, ctx) = self
			.inner
			.middleware
			.apply_request(service, method, request, ctx, Direction::ToRemote)
			.await;
		let envelope =
			Envelope::request(&id, service, method, payload).with_header_metadata(ctx.header_metadata);
		if let Err(error) = self.inner.send_envelope(envelope).await {
			// The request never left; the slot just goes away.
			self.inner.requests.take(&id);
			return Err(error);
		}
		if let Some(timeout) = timeout {
			if let Err(error) = self.set_deadline(&id, timeout).await {
				self.inner.clear_deadline(&id);
				self.inner.requests.take(&id);
				return Err(error);
			}
		}
		Ok(reply)
	}

	/// Opens an outbound stream.
	///
	/// The payload defaults to a `BidirectionalInit` marker when no request
	/// value is given. The returned handle carries the read side of the
	/// stream plus the reply future: for server streams it resolves with
	/// the stream-started sentinel, for client streams with the final
	/// value.
	pub async fn open_stream(
		&self,
		service: &str,
		method: &str,
		request: Option<JsonValue>,
		metadata: Option<Map<String, JsonValue>>,
		stream_id: Option<String>,
	) -> Result<OpenedStream, RpcError> {
		self.ensure_open()?;
		let id = stream_id.unwrap_or_else(|| new_quid("stream"));
		self.inner.streams.get_or_create(&id, Some(service), Some(method));
		let events = self.inner.streams.take_reader(&id).ok_or_else(|| {
			RpcError::IllegalState(format!("stream already has a consumer: {id}"))
		})?;
		let reply = self.inner.requests.register(&id);
		let payload = request.unwrap_or_else(|| {
			ServiceMarker::BidirectionalInit { stream_id: id.clone(), params: None }.to_value()
		});
		let ctx = CallContext {
			id: id.clone(),
			header_metadata: metadata.unwrap_or_default(),
			trailer_metadata: Map::new(),
		};
		let (payload, ctx) = self
			.inner
			.middleware
			.apply_request(service, method, payload, ctx, Direction::ToRemote)
			.await;
		let envelope =
			Envelope::request(&id, service, method, payload).with_header_metadata(ctx.header_metadata);
		if let Err(error) = self.inner.send_envelope(envelope).await {
			self.inner.streams.remove(&id);
			self.inner.requests.take(&id);
			return Err(error);
		}
		Ok(OpenedStream { stream_id: id, reply, events })
	}

	pub async fn send_stream_data(
		&self,
		stream_id: &str,
		data: JsonValue,
		service: Option<&str>,
		method: Option<&str>,
		metadata: Option<Map<String, JsonValue>>,
	) -> Result<(), RpcError> {
		self.ensure_open()?;
		let ctx = CallContext {
			id: stream_id.to_string(),
			header_metadata: metadata.unwrap_or_default(),
			trailer_metadata: Map::new(),
		};
		let (payload, ctx) = if service.is_some() && method.is_some() {
			self.inner
				.middleware
				.apply_stream_data(service, method, data, ctx, Direction::ToRemote)
				.await
		} else {
			(data, ctx)
		};
		let envelope = Envelope::stream_data(
			stream_id,
			service.map(str::to_string),
			method.map(str::to_string),
			payload,
		)
		.with_header_metadata(ctx.header_metadata);
		self.inner.send_envelope(envelope).await?;
		RPC_METRICS.stream_items_sent_total.inc();
		Ok(())
	}

	pub async fn send_stream_error(&self, stream_id: &str, message: &str) -> Result<(), RpcError> {
		self.ensure_open()?;
		self.inner.send_envelope(Envelope::error(stream_id, message, None)).await
	}

	pub async fn close_stream(
		&self,
		stream_id: &str,
		service: Option<&str>,
		method: Option<&str>,
		metadata: Option<Map<String, JsonValue>>,
	) -> Result<(), RpcError> {
		self.ensure_open()?;
		let ctx = CallContext {
			id: stream_id.to_string(),
			header_metadata: metadata.unwrap_or_default(),
			trailer_metadata: Map::new(),
		};
		self.inner
			.middleware
			.apply_stream_end(service, method, &ctx, Direction::ToRemote)
			.await;
		let envelope =
			Envelope::stream_end(stream_id).with_header_metadata(ctx.header_metadata);
		self.inner.send_envelope(envelope).await
	}

	/// Measures the round trip to the peer.
	pub async fn send_ping(&self, timeout: Option<Duration>) -> Result<Duration, RpcError> {
		self.ensure_open()?;
		let id = new_quid("ping");
		let reply = self.inner.requests.register(&id);
		let marker = ServiceMarker::Ping { timestamp: unix_epoch_ms() };
		let start = Instant::now();
		if let Err(error) = self.inner.send_envelope(Envelope::ping(&id, &marker)).await {
			self.inner.requests.take(&id);
			return Err(error);
		}
		RPC_METRICS.pings_total.inc();
		let timeout = timeout.unwrap_or_else(|| self.inner.config.ping_timeout());
		match tokio::time::timeout(timeout, reply).await {
			Ok(Ok(_pong)) => Ok(start.elapsed()),
			Ok(Err(error)) => Err(error),
			Err(_elapsed) => {
				self.inner
					.requests
					.fail(&id, RpcError::Timeout(format!("ping timed out after {timeout:?}")));
				Err(RpcError::Timeout(format!("ping timed out after {timeout:?}")))
			},
		}
	}

	/// Sends a marker on a stream. Ping markers elevate the envelope kind
	/// to `Ping`; everything else travels as stream data.
	pub async fn send_service_marker(
		&self,
		stream_id: &str,
		marker: &ServiceMarker,
		service: Option<&str>,
		method: Option<&str>,
		metadata: Option<Map<String, JsonValue>>,
	) -> Result<(), RpcError> {
		self.ensure_open()?;
		let envelope = match marker {
			ServiceMarker::Ping { .. } => Envelope::ping(stream_id, marker),
			_ => Envelope::stream_data(
				stream_id,
				service.map(str::to_string),
				method.map(str::to_string),
				marker.to_value(),
			),
		};
		self.inner
			.send_envelope(envelope.with_header_metadata(metadata.unwrap_or_default()))
			.await
	}

	/// Sends a status marker; a non-OK code is paired with a legacy error
	/// envelope for consumers which predate markers.
	pub async fn send_status(
		&self,
		id: &str,
		code: StatusCode,
		message: &str,
		details: Option<JsonValue>,
	) -> Result<(), RpcError> {
		self.ensure_open()?;
		self.inner.emit_status(id, code, message, details).await
	}

	/// Sends a deadline marker to the peer and arms the local timer.
	pub async fn set_deadline(&self, id: &str, timeout: Duration) -> Result<(), RpcError> {
		self.ensure_open()?;
		let epoch_ms = unix_epoch_ms() + timeout.as_millis() as u64;
		let marker = ServiceMarker::Deadline { epoch_ms };
		self.inner
			.send_envelope(Envelope::stream_data(id, None, None, marker.to_value()))
			.await?;
		self.inner.arm_deadline(id, epoch_ms);
		Ok(())
	}

	/// Cancels an in-flight operation from the caller side.
	pub async fn cancel_operation(&self, id: &str, reason: Option<&str>) -> Result<(), RpcError> {
		self.ensure_open()?;
		let reason_text = reason.unwrap_or("operation cancelled");
		let marker = ServiceMarker::Cancel {
			operation_id: id.to_string(),
			reason: reason.map(str::to_string),
			details: None,
		};
		self.inner
			.send_envelope(Envelope::stream_data(id, None, None, marker.to_value()))
			.await?;
		self.inner.emit_status(id, StatusCode::Cancelled, reason_text, None).await?;
		self.inner
			.terminate_operation(
				id,
				RpcError::Status {
					code: StatusCode::Cancelled,
					message: reason_text.to_string(),
					details: None,
				},
			)
			.await;
		Ok(())
	}

	/// Tears the endpoint down: stops the pump, fails every pending slot
	/// with "endpoint closed", closes every sink and timer, then closes
	/// the transport.
	pub async fn close(&self) -> Result<(), RpcError> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		if let Some(pump) = self.inner.pump.lock().unwrap().take() {
			pump.abort();
		}
		let failed_slots = self.inner.requests.fail_all(|| RpcError::TransportClosed);
		let closed_streams = self.inner.streams.close_all();
		let timers: Vec<DeadlineTimer> =
			self.inner.deadlines.lock().unwrap().drain().map(|(_, timer)| timer).collect();
		for timer in &timers {
			timer.handle.abort();
		}
		info!(failed_slots, closed_streams, "endpoint closed");
		self.inner.transport.close().await
	}

	fn ensure_open(&self) -> Result<(), RpcError> {
		if self.inner.is_closed() {
			return Err(RpcError::IllegalState("endpoint is closed".to_string()));
		}
		Ok(())
	}
}

impl EndpointInner {
	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub(crate) async fn send_envelope(&self, mut envelope: Envelope) -> Result<(), RpcError> {
		if envelope.debug_label.is_none() {
			envelope.debug_label = self.config.debug_label.clone();
		}
		let frame = self.codec.encode(&envelope)?;
		self.transport.send(frame).await
	}

	/// Status emission; non-OK codes are preceded by a legacy error
	/// envelope so that the terminal status is always the last frame.
	pub(crate) async fn emit_status(
		&self,
		id: &str,
		code: StatusCode,
		message: &str,
		details: Option<JsonValue>,
	) -> Result<(), RpcError> {
		if code != StatusCode::Ok {
			self.send_envelope(Envelope::error(id, message, Some(code.name()))).await?;
		}
		let marker =
			ServiceMarker::Status { code, message: message.to_string(), details };
		self.send_envelope(Envelope::stream_data(id, None, None, marker.to_value())).await
	}

	pub(crate) fn clear_deadline(&self, id: &str) {
		if let Some(timer) = self.deadlines.lock().unwrap().remove(id) {
			timer.handle.abort();
		}
	}

	pub(crate) fn deadline_for(&self, id: &str) -> Option<u64> {
		self.deadlines.lock().unwrap().get(id).map(|timer| timer.epoch_ms)
	}

	/// Arms (or re-arms) the expiry timer for an operation.
	pub(crate) fn arm_deadline(self: &Arc<Self>, id: &str, epoch_ms: u64) {
		let delay_ms = epoch_ms.saturating_sub(unix_epoch_ms());
		let weak = Arc::downgrade(self);
		let operation_id = id.to_string();
		let handle = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(delay_ms)).await;
			if let Some(inner) = weak.upgrade() {
				inner.expire_operation(&operation_id).await;
			}
		});
		let previous = self
			.deadlines
			.lock()
			.unwrap()
			.insert(id.to_string(), DeadlineTimer { epoch_ms, handle });
		if let Some(previous) = previous {
			previous.handle.abort();
		}
	}

	/// Deadline outcome: fail the slot, close the sink, tell the peer.
	///
	/// May run on the timer task itself, so the timer entry is dropped
	/// without an abort.
	pub(crate) async fn expire_operation(&self, id: &str) {
		self.deadlines.lock().unwrap().remove(id);
		debug!(operation_id = %id, "operation deadline expired");
		self.requests.fail(id, RpcError::Timeout("Deadline exceeded".to_string()));
		if let Some(sink) = self.streams.get(id) {
			sink.push_error(RpcError::Timeout("Deadline exceeded".to_string()));
		}
		if let Err(error) =
			self.emit_status(id, StatusCode::DeadlineExceeded, "Deadline exceeded", None).await
		{
			warn!(operation_id = %id, error = %error, "failed to emit deadline status");
		}
	}

	/// Terminal failure shared by cancel and non-OK status paths: the slot
	/// fails exactly once and the sink closes with one terminal error.
	pub(crate) async fn terminate_operation(&self, id: &str, error: RpcError) {
		self.clear_deadline(id);
		self.requests.fail(id, error.duplicate());
		if let Some(sink) = self.streams.get(id) {
			sink.push_error(error);
		}
	}
}

impl Drop for EndpointInner {
	fn drop(&mut self) {
		if let Some(pump) = self.pump.lock().unwrap().take() {
			pump.abort();
		}
		for (_, timer) in self.deadlines.lock().unwrap().drain() {
			timer.handle.abort();
		}
	}
}

fn spawn_pump(inner: &Arc<EndpointInner>) -> JoinHandle<()> {
	let weak = Arc::downgrade(inner);
	let mut frames = inner.transport.receive();
	tokio::spawn(async move {
		while let Some(frame) = frames.next().await {
			let Some(inner) = weak.upgrade() else {
				break;
			};
			RPC_METRICS.inbound_frames_total.inc();
			match inner.codec.decode(&frame) {
				Ok(envelope) => dispatcher::dispatch(&inner, envelope).await,
				Err(error) => {
					RPC_METRICS.dropped_frames_total.inc();
					warn!(error = %error, "failed to decode inbound frame, dropping");
				},
			}
		}
		debug!("transport inbound sequence ended");
	})
}
