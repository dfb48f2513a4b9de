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
	fmt,
	future::Future,
	pin::Pin,
	sync::{Arc, RwLock},
};

use common::ServiceStream;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use crate::{error::RpcError, stream_table::StreamReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
	Unary,
	ServerStream,
	ClientStream,
	Bidi,
}

/// Everything a handler gets to see about the call it serves.
///
/// `inbound` carries the request stream for client-streaming and
/// bidirectional methods; it is `None` for the other kinds.
pub struct HandlerContext {
	pub id: String,
	pub service: String,
	pub method: String,
	pub payload: JsonValue,
	pub header_metadata: Map<String, JsonValue>,
	pub trailer_metadata: Map<String, JsonValue>,
	pub deadline_epoch_ms: Option<u64>,
	pub inbound: Option<StreamReader>,
}

impl fmt::Debug for HandlerContext {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("HandlerContext")
			.field("id", &self.id)
			.field("service", &self.service)
			.field("method", &self.method)
			.finish()
	}
}

/// What a handler hands back to the engine.
pub enum HandlerReply {
	/// A single value: unary reply, or the final value of a client stream.
	Scalar(JsonValue),
	/// A source of values to deliver as a server/bidirectional stream.
	Stream(ServiceStream<Result<JsonValue, RpcError>>),
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerReply, RpcError>> + Send>>;

/// Opaque to the engine; built at registration time.
pub type HandlerInvoker = Arc<dyn Fn(HandlerContext) -> HandlerFuture + Send + Sync>;

#[derive(Clone)]
pub struct MethodDescriptor {
	pub service: String,
	pub method: String,
	pub kind: MethodKind,
	invoker: HandlerInvoker,
}

impl fmt::Debug for MethodDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("MethodDescriptor")
			.field("service", &self.service)
			.field("method", &self.method)
			.field("kind", &self.kind)
			.finish()
	}
}

impl MethodDescriptor {
	pub fn new(
		service: impl Into<String>,
		method: impl Into<String>,
		kind: MethodKind,
		invoker: HandlerInvoker,
	) -> MethodDescriptor {
		MethodDescriptor { service: service.into(), method: method.into(), kind, invoker }
	}

	pub fn unary<F, Fut>(
		service: impl Into<String>,
		method: impl Into<String>,
		handler: F,
	) -> MethodDescriptor
	where
		F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<JsonValue, RpcError>> + Send + 'static,
	{
		let invoker: HandlerInvoker = Arc::new(move |ctx| {
			let reply = handler(ctx);
			Box::pin(async move { reply.await.map(HandlerReply::Scalar) })
		});
		MethodDescriptor::new(service, method, MethodKind::Unary, invoker)
	}

	/// Unary with typed request/response adaptation done at registration
	/// time; the engine stays payload-agnostic.
	pub fn unary_typed<Req, Resp, F, Fut>(
		service: impl Into<String>,
		method: impl Into<String>,
		handler: F,
	) -> MethodDescriptor
	where
		Req: DeserializeOwned + Send + 'static,
		Resp: Serialize + Send + 'static,
		F: Fn(Req, HandlerContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
	{
		let handler = Arc::new(handler);
		MethodDescriptor::unary(service, method, move |ctx: HandlerContext| {
			let handler = handler.clone();
			async move {
				let request: Req = serde_json::from_value(ctx.payload.clone())
					.map_err(|error| RpcError::Format(error.to_string()))?;
				let response = handler(request, ctx).await?;
				serde_json::to_value(response).map_err(RpcError::from)
			}
		})
	}

	pub fn server_streaming<F, Fut>(
		service: impl Into<String>,
		method: impl Into<String>,
		handler: F,
	) -> MethodDescriptor
	where
		F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<ServiceStream<Result<JsonValue, RpcError>>, RpcError>>
			+ Send
			+ 'static,
	{
		let invoker: HandlerInvoker = Arc::new(move |ctx| {
			let source = handler(ctx);
			Box::pin(async move { source.await.map(HandlerReply::Stream) })
		});
		MethodDescriptor::new(service, method, MethodKind::ServerStream, invoker)
	}

	/// The handler consumes `ctx.inbound` and returns the final value.
	pub fn client_streaming<F, Fut>(
		service: impl Into<String>,
		method: impl Into<String>,
		handler: F,
	) -> MethodDescriptor
	where
		F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<JsonValue, RpcError>> + Send + 'static,
	{
		let invoker: HandlerInvoker = Arc::new(move |ctx| {
			let reply = handler(ctx);
			Box::pin(async move { reply.await.map(HandlerReply::Scalar) })
		});
		MethodDescriptor::new(service, method, MethodKind::ClientStream, invoker)
	}

	/// The handler consumes `ctx.inbound` and returns its response source.
	pub fn bidi_streaming<F, Fut>(
		service: impl Into<String>,
		method: impl Into<String>,
		handler: F,
	) -> MethodDescriptor
	where
		F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<ServiceStream<Result<JsonValue, RpcError>>, RpcError>>
			+ Send
			+ 'static,
	{
		let invoker: HandlerInvoker = Arc::new(move |ctx| {
			let source = handler(ctx);
			Box::pin(async move { source.await.map(HandlerReply::Stream) })
		});
		MethodDescriptor::new(service, method, MethodKind::Bidi, invoker)
	}

	pub(crate) fn invoke(&self, ctx: HandlerContext) -> HandlerFuture {
		(self.invoker)(ctx)
	}
}

/// Map (service, method) to handler descriptor.
#[derive(Default)]
pub struct MethodRegistry {
	methods: RwLock<HashMap<(String, String), MethodDescriptor>>,
}

impl MethodRegistry {
	/// Re-registration of the same (service, method) is rejected.
	pub fn register(&self, descriptor: MethodDescriptor) -> bool {
		let key = (descriptor.service.clone(), descriptor.method.clone());
		let mut methods = self.methods.write().unwrap();
		if methods.contains_key(&key) {
			warn!(service = %key.0, method = %key.1, "method already registered, ignoring");
			return false;
		}
		methods.insert(key, descriptor);
		true
	}

	pub fn find(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
		self.methods
			.read()
			.unwrap()
			.get(&(service.to_string(), method.to_string()))
			.cloned()
	}

	pub fn methods_for(&self, service: &str) -> Vec<String> {
		let mut methods: Vec<String> = self
			.methods
			.read()
			.unwrap()
			.keys()
			.filter(|(registered_service, _)| registered_service == service)
			.map(|(_, method)| method.clone())
			.collect();
		methods.sort();
		methods
	}

	pub fn all(&self) -> Vec<MethodDescriptor> {
		self.methods.read().unwrap().values().cloned().collect()
	}

	pub fn clear(&self) {
		self.methods.write().unwrap().clear();
	}

	pub fn len(&self) -> usize {
		self.methods.read().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.methods.read().unwrap().is_empty()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::{json, Map, Value as JsonValue};

	use super::{HandlerContext, HandlerReply, MethodDescriptor, MethodKind, MethodRegistry};

	fn test_ctx(payload: JsonValue) -> HandlerContext {
		HandlerContext {
			id: "req-1".to_string(),
			service: "calc".to_string(),
			method: "add".to_string(),
			payload,
			header_metadata: Map::new(),
			trailer_metadata: Map::new(),
			deadline_epoch_ms: None,
			inbound: None,
		}
	}

	#[tokio::test]
	async fn test_unary_descriptor_invokes() {
		let descriptor = MethodDescriptor::unary("calc", "add", |ctx: HandlerContext| async move {
			let a = ctx.payload["a"].as_i64().unwrap_or(0);
			let b = ctx.payload["b"].as_i64().unwrap_or(0);
			Ok(json!(a + b))
		});
		assert_eq!(descriptor.kind, MethodKind::Unary);
		let reply = descriptor.invoke(test_ctx(json!({"a": 2, "b": 3}))).await.unwrap();
		match reply {
			HandlerReply::Scalar(value) => assert_eq!(value, json!(5)),
			HandlerReply::Stream(_) => panic!("expected a scalar reply"),
		}
	}

	#[tokio::test]
	async fn test_unary_typed_rejects_malformed_request() {
		#[derive(serde::Deserialize)]
		struct AddRequest {
			a: i64,
			b: i64,
		}
		let descriptor =
			MethodDescriptor::unary_typed("calc", "add", |request: AddRequest, _ctx| async move {
				Ok(request.a + request.b)
			});
		let outcome = descriptor.invoke(test_ctx(json!("not a mapping"))).await;
		assert!(matches!(outcome, Err(crate::error::RpcError::Format(_))));
	}

	#[test]
	fn test_re_registration_is_rejected() {
		let registry = MethodRegistry::default();
		let make = || {
			MethodDescriptor::unary("calc", "add", |_ctx: HandlerContext| async move {
				Ok(json!("ok"))
			})
		};
		assert!(registry.register(make()));
		assert!(!registry.register(make()));
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn test_find_and_listings() {
		let registry = MethodRegistry::default();
		registry.register(MethodDescriptor::unary("calc", "add", |_ctx| async move {
			Ok(json!(0))
		}));
		registry.register(MethodDescriptor::unary("calc", "sub", |_ctx| async move {
			Ok(json!(0))
		}));
		registry.register(MethodDescriptor::unary("clock", "now", |_ctx| async move {
			Ok(json!(0))
		}));
		assert!(registry.find("calc", "add").is_some());
		assert!(registry.find("calc", "mul").is_none());
		assert_eq!(registry.methods_for("calc"), vec!["add".to_string(), "sub".to_string()]);
		assert_eq!(registry.all().len(), 3);
		registry.clear();
		assert!(registry.is_empty());
	}
}
