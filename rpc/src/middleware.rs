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

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use crate::error::RpcError;

/// Which way a payload is travelling when a hook observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	FromRemote,
	ToRemote,
}

/// Call-scoped values carried through the hooks.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
	pub id: String,
	pub header_metadata: Map<String, JsonValue>,
	pub trailer_metadata: Map<String, JsonValue>,
}

impl CallContext {
	pub fn new(id: &str) -> CallContext {
		CallContext { id: id.to_string(), ..Default::default() }
	}
}

/// An interceptor on the request/response/stream flow.
///
/// Every hook is best-effort: a hook returning an error is logged and the
/// call proceeds with the pre-hook values. Middleware must not re-enter the
/// engine with the same id from within a hook.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
	fn name(&self) -> &'static str {
		"anonymous"
	}

	async fn on_request(
		&self,
		_service: &str,
		_method: &str,
		payload: JsonValue,
		ctx: CallContext,
		_direction: Direction,
	) -> Result<(JsonValue, CallContext), RpcError> {
		Ok((payload, ctx))
	}

	async fn on_response(
		&self,
		_service: Option<&str>,
		_method: Option<&str>,
		payload: JsonValue,
		ctx: CallContext,
		_direction: Direction,
	) -> Result<(JsonValue, CallContext), RpcError> {
		Ok((payload, ctx))
	}

	async fn on_stream_data(
		&self,
		_service: Option<&str>,
		_method: Option<&str>,
		payload: JsonValue,
		ctx: CallContext,
		_direction: Direction,
	) -> Result<(JsonValue, CallContext), RpcError> {
		Ok((payload, ctx))
	}

	async fn on_stream_end(
		&self,
		_service: Option<&str>,
		_method: Option<&str>,
		_ctx: &CallContext,
		_direction: Direction,
	) -> Result<(), RpcError> {
		Ok(())
	}

	async fn on_error(
		&self,
		_service: Option<&str>,
		_method: Option<&str>,
		_error: &RpcError,
		_ctx: &CallContext,
		_direction: Direction,
	) -> Result<(), RpcError> {
		Ok(())
	}
}

/// Ordered interceptors. Append-only while the engine runs.
#[derive(Default)]
pub struct MiddlewareChain {
	interceptors: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
	pub fn push(&self, middleware: Arc<dyn Middleware>) {
		self.interceptors.write().unwrap().push(middleware);
	}

	pub fn len(&self) -> usize {
		self.interceptors.read().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.interceptors.read().unwrap().is_empty()
	}

	fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
		self.interceptors.read().unwrap().clone()
	}

	pub async fn apply_request(
		&self,
		service: &str,
		method: &str,
		mut payload: JsonValue,
		mut ctx: CallContext,
		direction: Direction,
	) -> (JsonValue, CallContext) {
		for middleware in self.snapshot() {
			match middleware
				.on_request(service, method, payload.clone(), ctx.clone(), direction)
				.await
			{
				Ok((next_payload, next_ctx)) => {
					payload = next_payload;
					ctx = next_ctx;
				},
				Err(error) => {
					warn!(middleware = middleware.name(), error = %error, "on_request hook failed, keeping pre-hook values");
				},
			}
		}
		(payload, ctx)
	}

	pub async fn apply_response(
		&self,
		service: Option<&str>,
		method: Option<&str>,
		mut payload: JsonValue,
		mut ctx: CallContext,
		direction: Direction,
	) -> (JsonValue, CallContext) {
		for middleware in self.snapshot() {
			match middleware
				.on_response(service, method, payload.clone(), ctx.clone(), direction)
				.await
			{
				Ok((next_payload, next_ctx)) => {
					payload = next_payload;
					ctx = next_ctx;
				},
				Err(error) => {
					warn!(middleware = middleware.name(), error = %error, "on_response hook failed, keeping pre-hook values");
				},
			}
		}
		(payload, ctx)
	}

	pub async fn apply_stream_data(
		&self,
		service: Option<&str>,
		method: Option<&str>,
		mut payload: JsonValue,
		mut ctx: CallContext,
		direction: Direction,
	) -> (JsonValue, CallContext) {
		for middleware in self.snapshot() {
			match middleware
				.on_stream_data(service, method, payload.clone(), ctx.clone(), direction)
				.await
			{
				Ok((next_payload, next_ctx)) => {
					payload = next_payload;
					ctx = next_ctx;
				},
				Err(error) => {
					warn!(middleware = middleware.name(), error = %error, "on_stream_data hook failed, keeping pre-hook values");
				},
			}
		}
		(payload, ctx)
	}

	pub async fn apply_stream_end(
		&self,
		service: Option<&str>,
		method: Option<&str>,
		ctx: &CallContext,
		direction: Direction,
	) {
		for middleware in self.snapshot() {
			if let Err(error) = middleware.on_stream_end(service, method, ctx, direction).await {
				warn!(middleware = middleware.name(), error = %error, "on_stream_end hook failed, ignoring");
			}
		}
	}

	pub async fn apply_error(
		&self,
		service: Option<&str>,
		method: Option<&str>,
		error: &RpcError,
		ctx: &CallContext,
		direction: Direction,
	) {
		for middleware in self.snapshot() {
			if let Err(hook_error) =
				middleware.on_error(service, method, error, ctx, direction).await
			{
				warn!(middleware = middleware.name(), error = %hook_error, "on_error hook failed, ignoring");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use async_trait::async_trait;
	use serde_json::{json, Value as JsonValue};

	use super::{CallContext, Direction, Middleware, MiddlewareChain};
	use crate::error::RpcError;

	struct Doubler;

	#[async_trait]
	impl Middleware for Doubler {
		fn name(&self) -> &'static str {
			"doubler"
		}

		async fn on_request(
			&self,
			_service: &str,
			_method: &str,
			payload: JsonValue,
			ctx: CallContext,
			_direction: Direction,
		) -> Result<(JsonValue, CallContext), RpcError> {
			let doubled = payload.as_i64().unwrap_or(0) * 2;
			Ok((json!(doubled), ctx))
		}
	}

	struct Faulty;

	#[async_trait]
	impl Middleware for Faulty {
		fn name(&self) -> &'static str {
			"faulty"
		}

		async fn on_request(
			&self,
			_service: &str,
			_method: &str,
			_payload: JsonValue,
			_ctx: CallContext,
			_direction: Direction,
		) -> Result<(JsonValue, CallContext), RpcError> {
			Err(RpcError::Internal("hook exploded".to_string()))
		}
	}

	#[tokio::test]
	async fn test_hooks_compose_in_order() {
		let chain = MiddlewareChain::default();
		chain.push(Arc::new(Doubler));
		chain.push(Arc::new(Doubler));
		let (payload, _ctx) = chain
			.apply_request("svc", "m", json!(3), CallContext::new("req-1"), Direction::ToRemote)
			.await;
		assert_eq!(payload, json!(12));
	}

	#[tokio::test]
	async fn test_faulty_hook_keeps_pre_hook_values() {
		let chain = MiddlewareChain::default();
		chain.push(Arc::new(Faulty));
		chain.push(Arc::new(Doubler));
		let (payload, _ctx) = chain
			.apply_request("svc", "m", json!(3), CallContext::new("req-1"), Direction::FromRemote)
			.await;
		// The faulty hook is skipped; the doubler still runs.
		assert_eq!(payload, json!(6));
	}

	#[tokio::test]
	async fn test_empty_chain_is_identity() {
		let chain = MiddlewareChain::default();
		let (payload, ctx) = chain
			.apply_stream_data(
				Some("svc"),
				Some("m"),
				json!({"k": 1}),
				CallContext::new("stream-1"),
				Direction::FromRemote,
			)
			.await;
		assert_eq!(payload, json!({"k": 1}));
		assert_eq!(ctx.id, "stream-1");
	}
}
