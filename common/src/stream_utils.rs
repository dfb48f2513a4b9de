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

use std::{any::TypeId, fmt, pin::Pin};

use futures::{stream, Stream, StreamExt, TryStreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream, WatchStream};

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + Unpin + 'static>>;

/// A stream impl shared by every streaming surface of the rpc runtime.
///
/// Stream sinks hand their read side out as a `ServiceStream`, and
/// server-streaming handlers return one as their response source.
pub struct ServiceStream<T> {
	inner: BoxStream<T>,
}

impl<T> ServiceStream<T>
where
	T: Send + 'static,
{
	pub fn new(inner: BoxStream<T>) -> Self {
		Self { inner }
	}

	pub fn empty() -> Self {
		Self { inner: Box::pin(stream::empty()) }
	}

	/// Collects every remaining item.
	///
	/// Only returns once the producing side has been dropped or closed.
	pub async fn collect_all(mut self) -> Vec<T> {
		let mut items = Vec::new();
		while let Some(item) = self.next().await {
			items.push(item);
		}
		items
	}
}

impl<T> fmt::Debug for ServiceStream<T>
where
	T: 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ServiceStream<{:?}>", TypeId::of::<T>())
	}
}

impl<T> Unpin for ServiceStream<T> {}

impl<T> ServiceStream<T>
where
	T: Send + 'static,
{
	pub fn new_bounded(capacity: usize) -> (mpsc::Sender<T>, Self) {
		let (sender, receiver) = mpsc::channel(capacity);
		(sender, receiver.into())
	}

	pub fn new_unbounded() -> (mpsc::UnboundedSender<T>, Self) {
		let (sender, receiver) = mpsc::unbounded_channel();
		(sender, receiver.into())
	}
}

impl<T> ServiceStream<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub fn new_watch(init: T) -> (watch::Sender<T>, Self) {
		let (sender, receiver) = watch::channel(init);
		(sender, receiver.into())
	}
}

impl<T, E> ServiceStream<Result<T, E>>
where
	T: Send + 'static,
	E: Send + 'static,
{
	pub fn map_err<F, U>(self, f: F) -> ServiceStream<Result<T, U>>
	where
		F: FnMut(E) -> U + Send + 'static,
		U: Send + 'static,
	{
		ServiceStream { inner: Box::pin(self.inner.map_err(f)) }
	}
}

impl<T> Stream for ServiceStream<T> {
	type Item = T;

	fn poll_next(
		mut self: std::pin::Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<Option<Self::Item>> {
		Pin::new(&mut self.inner).poll_next(cx)
	}
}

impl<T> From<mpsc::Receiver<T>> for ServiceStream<T>
where
	T: Send + 'static,
{
	fn from(receiver: mpsc::Receiver<T>) -> Self {
		Self { inner: Box::pin(ReceiverStream::new(receiver)) }
	}
}

impl<T> From<mpsc::UnboundedReceiver<T>> for ServiceStream<T>
where
	T: Send + 'static,
{
	fn from(receiver: mpsc::UnboundedReceiver<T>) -> Self {
		Self { inner: Box::pin(UnboundedReceiverStream::new(receiver)) }
	}
}

impl<T> From<watch::Receiver<T>> for ServiceStream<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(receiver: watch::Receiver<T>) -> Self {
		Self { inner: Box::pin(WatchStream::new(receiver)) }
	}
}

impl<T> From<Vec<T>> for ServiceStream<T>
where
	T: Send + 'static,
{
	fn from(values: Vec<T>) -> Self {
		Self { inner: Box::pin(stream::iter(values)) }
	}
}

#[cfg(test)]
mod tests {
	use futures::StreamExt;

	use super::ServiceStream;

	#[tokio::test]
	async fn test_service_stream_from_unbounded() {
		let (tx, stream) = ServiceStream::new_unbounded();
		tx.send(1u32).unwrap();
		tx.send(2u32).unwrap();
		drop(tx);
		assert_eq!(stream.collect_all().await, vec![1, 2]);
	}

	#[tokio::test]
	async fn test_service_stream_empty() {
		let stream = ServiceStream::<u32>::empty();
		assert!(stream.collect_all().await.is_empty());
	}

	#[tokio::test]
	async fn test_service_stream_map_err() {
		let stream: ServiceStream<Result<u32, u32>> = vec![Ok(1), Err(2)].into();
		let mut mapped = stream.map_err(|code| format!("error {code}"));
		assert_eq!(mapped.next().await, Some(Ok(1)));
		assert_eq!(mapped.next().await, Some(Err("error 2".to_string())));
		assert_eq!(mapped.next().await, None);
	}
}
