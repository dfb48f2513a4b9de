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
	sync::{Arc, Mutex},
};

use common::ServiceStream;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{error::RpcError, marker::ServiceMarker};

/// An item observed by a stream consumer.
///
/// Markers are delivered alongside data so that consumers observing the raw
/// stream see the in-band control flow.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
	Data(JsonValue),
	Marker(ServiceMarker),
}

pub type StreamReader = ServiceStream<Result<StreamEvent, RpcError>>;

/// Capacity of a stream sink's delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
	Bounded(usize),
	Unbounded,
}

enum SinkSender {
	Bounded(mpsc::Sender<Result<StreamEvent, RpcError>>),
	Unbounded(mpsc::UnboundedSender<Result<StreamEvent, RpcError>>),
}

impl SinkSender {
	fn send(&self, item: Result<StreamEvent, RpcError>) -> bool {
		match self {
			// A bounded sink sheds load instead of suspending the pump.
			SinkSender::Bounded(tx) => tx.try_send(item).is_ok(),
			SinkSender::Unbounded(tx) => tx.send(item).is_ok(),
		}
	}
}

/// Producer side of a stream, shared between the engine and handlers.
///
/// Once closed, further sends are no-ops; at most one terminal error is
/// ever delivered.
#[derive(Clone)]
pub struct StreamSink {
	inner: Arc<SinkInner>,
}

struct SinkInner {
	id: String,
	service: Option<String>,
	method: Option<String>,
	// `None` once closed. Closing drops the sender so the reader terminates.
	tx: Mutex<Option<SinkSender>>,
}

impl StreamSink {
	fn new(
		id: &str,
		service: Option<&str>,
		method: Option<&str>,
		capacity: QueueCapacity,
	) -> (StreamSink, StreamReader) {
		let (tx, reader) = match capacity {
			QueueCapacity::Bounded(capacity) => {
				let (tx, rx) = mpsc::channel(capacity);
				(SinkSender::Bounded(tx), rx.into())
			},
			QueueCapacity::Unbounded => {
				let (tx, rx) = mpsc::unbounded_channel();
				(SinkSender::Unbounded(tx), rx.into())
			},
		};
		let sink = StreamSink {
			inner: Arc::new(SinkInner {
				id: id.to_string(),
				service: service.map(str::to_string),
				method: method.map(str::to_string),
				tx: Mutex::new(Some(tx)),
			}),
		};
		(sink, reader)
	}

	pub fn id(&self) -> &str {
		&self.inner.id
	}

	pub fn service(&self) -> Option<&str> {
		self.inner.service.as_deref()
	}

	pub fn method(&self) -> Option<&str> {
		self.inner.method.as_deref()
	}

	pub fn is_closed(&self) -> bool {
		self.inner.tx.lock().unwrap().is_none()
	}

	/// Delivers an event. Returns false if the sink is already closed, the
	/// consumer is gone, or a bounded queue is full.
	pub fn push(&self, event: StreamEvent) -> bool {
		let guard = self.inner.tx.lock().unwrap();
		match guard.as_ref() {
			Some(tx) => {
				let delivered = tx.send(Ok(event));
				if !delivered {
					debug!(stream_id = %self.inner.id, "sink queue full or consumer gone, dropping event");
				}
				delivered
			},
			None => {
				debug!(stream_id = %self.inner.id, "push on closed sink, dropping");
				false
			},
		}
	}

	/// Delivers one terminal error, then closes. No-op if already closed.
	pub fn push_error(&self, error: RpcError) -> bool {
		let mut guard = self.inner.tx.lock().unwrap();
		match guard.take() {
			Some(tx) => tx.send(Err(error)),
			None => {
				debug!(stream_id = %self.inner.id, "error push on closed sink, dropping");
				false
			},
		}
	}

	/// Closes without a terminal error; the reader observes end-of-stream.
	pub fn close(&self) -> bool {
		self.inner.tx.lock().unwrap().take().is_some()
	}
}

struct StreamEntry {
	sink: StreamSink,
	reader: Option<StreamReader>,
}

/// Map stream-id to delivery sink.
///
/// Closed sinks stay in the table as tombstones: a late frame for a closed
/// id finds the closed sink instead of resurrecting the stream.
pub struct StreamTable {
	capacity: QueueCapacity,
	streams: Mutex<HashMap<String, StreamEntry>>,
}

impl Default for StreamTable {
	fn default() -> StreamTable {
		StreamTable::with_capacity(QueueCapacity::Unbounded)
	}
}

impl StreamTable {
	pub fn with_capacity(capacity: QueueCapacity) -> StreamTable {
		StreamTable { capacity, streams: Mutex::default() }
	}

	pub fn get_or_create(
		&self,
		id: &str,
		service: Option<&str>,
		method: Option<&str>,
	) -> StreamSink {
		let mut streams = self.streams.lock().unwrap();
		if let Some(entry) = streams.get(id) {
			return entry.sink.clone();
		}
		let (sink, reader) = StreamSink::new(id, service, method, self.capacity);
		streams.insert(id.to_string(), StreamEntry { sink: sink.clone(), reader: Some(reader) });
		sink
	}

	pub fn get(&self, id: &str) -> Option<StreamSink> {
		self.streams.lock().unwrap().get(id).map(|entry| entry.sink.clone())
	}

	/// Takes the read side for consumer wiring. Each stream has exactly one
	/// reader; a second take returns `None`.
	pub fn take_reader(&self, id: &str) -> Option<StreamReader> {
		self.streams.lock().unwrap().get_mut(id).and_then(|entry| entry.reader.take())
	}

	pub fn remove(&self, id: &str) -> Option<StreamSink> {
		self.streams.lock().unwrap().remove(id).map(|entry| entry.sink)
	}

	pub fn has(&self, id: &str) -> bool {
		self.streams.lock().unwrap().contains_key(id)
	}

	/// Closes every open sink. Returns how many were still open.
	pub fn close_all(&self) -> usize {
		let sinks: Vec<StreamSink> = self
			.streams
			.lock()
			.unwrap()
			.values()
			.map(|entry| entry.sink.clone())
			.collect();
		sinks.into_iter().filter(|sink| sink.close()).count()
	}

	pub fn open_count(&self) -> usize {
		self.streams
			.lock()
			.unwrap()
			.values()
			.filter(|entry| !entry.sink.is_closed())
			.count()
	}
}

#[cfg(test)]
mod tests {
	use futures::StreamExt;
	use serde_json::json;

	use super::{QueueCapacity, StreamEvent, StreamTable};
	use crate::error::RpcError;

	#[tokio::test]
	async fn test_sink_delivers_in_order() {
		let table = StreamTable::default();
		let sink = table.get_or_create("stream-1", Some("svc"), Some("m"));
		let mut reader = table.take_reader("stream-1").unwrap();
		sink.push(StreamEvent::Data(json!(1)));
		sink.push(StreamEvent::Data(json!(2)));
		sink.close();
		assert_eq!(reader.next().await.unwrap().unwrap(), StreamEvent::Data(json!(1)));
		assert_eq!(reader.next().await.unwrap().unwrap(), StreamEvent::Data(json!(2)));
		assert!(reader.next().await.is_none());
	}

	#[tokio::test]
	async fn test_closed_sink_is_not_resurrected() {
		let table = StreamTable::default();
		let sink = table.get_or_create("stream-1", None, None);
		sink.close();
		let again = table.get_or_create("stream-1", None, None);
		assert!(again.is_closed());
		assert!(!again.push(StreamEvent::Data(json!("late"))));
	}

	#[tokio::test]
	async fn test_single_terminal_error() {
		let table = StreamTable::default();
		let sink = table.get_or_create("stream-1", None, None);
		let mut reader = table.take_reader("stream-1").unwrap();
		assert!(sink.push_error(RpcError::Internal("first".to_string())));
		assert!(!sink.push_error(RpcError::Internal("second".to_string())));
		assert!(!sink.push(StreamEvent::Data(json!("after"))));
		let only_event = reader.next().await.unwrap();
		assert_eq!(only_event.unwrap_err().to_string(), "internal error: first");
		assert!(reader.next().await.is_none());
	}

	#[tokio::test]
	async fn test_reader_taken_once() {
		let table = StreamTable::default();
		let _sink = table.get_or_create("stream-1", None, None);
		assert!(table.take_reader("stream-1").is_some());
		assert!(table.take_reader("stream-1").is_none());
	}

	#[tokio::test]
	async fn test_bounded_sink_sheds_load_when_full() {
		let table = StreamTable::with_capacity(QueueCapacity::Bounded(1));
		let sink = table.get_or_create("stream-1", None, None);
		let mut reader = table.take_reader("stream-1").unwrap();
		assert!(sink.push(StreamEvent::Data(json!(1))));
		// Queue full: the event is dropped, not queued.
		assert!(!sink.push(StreamEvent::Data(json!(2))));
		assert_eq!(reader.next().await.unwrap().unwrap(), StreamEvent::Data(json!(1)));
		// Consuming frees a slot.
		assert!(sink.push(StreamEvent::Data(json!(3))));
		assert_eq!(reader.next().await.unwrap().unwrap(), StreamEvent::Data(json!(3)));
	}

	#[tokio::test]
	async fn test_close_all_counts_open_sinks() {
		let table = StreamTable::default();
		let open = table.get_or_create("stream-1", None, None);
		let closed = table.get_or_create("stream-2", None, None);
		closed.close();
		assert_eq!(table.close_all(), 1);
		assert!(open.is_closed());
	}
}
