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
	future::Future,
	pin::Pin,
	sync::Mutex,
	task::{Context, Poll},
};

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{error::RpcError, metrics::RPC_METRICS};

type ReplyResult = Result<JsonValue, RpcError>;

/// Caller side of a request slot.
///
/// Resolves with the reply payload, or with the first terminal error
/// observed for the id. Resolves at most once by construction.
#[derive(Debug)]
pub struct PendingReply {
	rx: oneshot::Receiver<ReplyResult>,
}

impl Future for PendingReply {
	type Output = ReplyResult;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(Ok(reply)) => Poll::Ready(reply),
			// The slot was dropped without completion. Only the engine
			// tearing down can cause this.
			Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::TransportClosed)),
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Responder-side handle on a single request slot, detached from the table.
pub struct RequestSlot {
	id: String,
	tx: oneshot::Sender<ReplyResult>,
}

impl RequestSlot {
	pub fn complete(self, value: JsonValue) {
		// A send error just means the caller dropped its reply future.
		let _ = self.tx.send(Ok(value));
	}

	pub fn fail(self, error: RpcError) {
		let _ = self.tx.send(Err(error));
	}

	pub fn id(&self) -> &str {
		&self.id
	}
}

/// Map request-id to single-shot reply slot; at-most-once completion.
///
/// Completing or failing an id that is absent (never registered, or already
/// completed) is a silent no-op.
#[derive(Default)]
pub struct RequestTable {
	slots: Mutex<HashMap<String, oneshot::Sender<ReplyResult>>>,
}

impl RequestTable {
	pub fn register(&self, id: &str) -> PendingReply {
		let (tx, rx) = oneshot::channel();
		let previous = self.slots.lock().unwrap().insert(id.to_string(), tx);
		if let Some(previous_tx) = previous {
			debug!(request_id = %id, "request id reused, failing previous slot");
			let _ = previous_tx
				.send(Err(RpcError::IllegalState(format!("request id reused: {id}"))));
		}
		PendingReply { rx }
	}

	pub fn complete(&self, id: &str, value: JsonValue) -> bool {
		match self.take(id) {
			Some(slot) => {
				slot.complete(value);
				RPC_METRICS.slots_completed_total.inc();
				true
			},
			None => {
				debug!(request_id = %id, "no pending slot for completion, dropping");
				false
			},
		}
	}

	pub fn fail(&self, id: &str, error: RpcError) -> bool {
		match self.take(id) {
			Some(slot) => {
				slot.fail(error);
				RPC_METRICS.slots_failed_total.inc();
				true
			},
			None => {
				debug!(request_id = %id, "no pending slot for failure, dropping");
				false
			},
		}
	}

	pub fn peek(&self, id: &str) -> bool {
		self.slots.lock().unwrap().contains_key(id)
	}

	pub fn take(&self, id: &str) -> Option<RequestSlot> {
		let tx = self.slots.lock().unwrap().remove(id)?;
		Some(RequestSlot { id: id.to_string(), tx })
	}

	/// Fails every outstanding slot. Used on engine shutdown.
	pub fn fail_all(&self, make_error: impl Fn() -> RpcError) -> usize {
		let drained: Vec<(String, oneshot::Sender<ReplyResult>)> =
			self.slots.lock().unwrap().drain().collect();
		let failed = drained.len();
		for (_, tx) in drained {
			let _ = tx.send(Err(make_error()));
		}
		RPC_METRICS.slots_failed_total.inc_by(failed as u64);
		failed
	}

	pub fn len(&self) -> usize {
		self.slots.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.lock().unwrap().is_empty()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::RequestTable;
	use crate::error::RpcError;

	#[tokio::test]
	async fn test_complete_resolves_pending_reply() {
		let table = RequestTable::default();
		let reply = table.register("req-1");
		assert!(table.peek("req-1"));
		assert!(table.complete("req-1", json!("ok")));
		assert_eq!(reply.await.unwrap(), json!("ok"));
		assert!(!table.peek("req-1"));
	}

	#[tokio::test]
	async fn test_completion_is_at_most_once() {
		let table = RequestTable::default();
		let reply = table.register("req-1");
		assert!(table.complete("req-1", json!(1)));
		assert!(!table.complete("req-1", json!(2)));
		assert!(!table.fail("req-1", RpcError::Internal("late".to_string())));
		assert_eq!(reply.await.unwrap(), json!(1));
	}

	#[tokio::test]
	async fn test_fail_resolves_with_error() {
		let table = RequestTable::default();
		let reply = table.register("req-1");
		assert!(table.fail("req-1", RpcError::Timeout("deadline".to_string())));
		assert!(matches!(reply.await, Err(RpcError::Timeout(_))));
	}

	#[tokio::test]
	async fn test_fail_all_drains_every_slot() {
		let table = RequestTable::default();
		let reply_a = table.register("req-a");
		let reply_b = table.register("req-b");
		assert_eq!(table.fail_all(|| RpcError::TransportClosed), 2);
		assert!(table.is_empty());
		assert_eq!(reply_a.await.unwrap_err().to_string(), "endpoint closed");
		assert_eq!(reply_b.await.unwrap_err().to_string(), "endpoint closed");
	}

	#[tokio::test]
	async fn test_dropped_slot_resolves_as_closed() {
		let table = RequestTable::default();
		let reply = table.register("req-1");
		drop(table.take("req-1").unwrap());
		assert!(matches!(reply.await, Err(RpcError::TransportClosed)));
	}

	#[tokio::test]
	async fn test_register_same_id_fails_previous() {
		let table = RequestTable::default();
		let first = table.register("req-1");
		let second = table.register("req-1");
		assert!(matches!(first.await, Err(RpcError::IllegalState(_))));
		table.complete("req-1", json!("late win"));
		assert_eq!(second.await.unwrap(), json!("late win"));
	}
}
