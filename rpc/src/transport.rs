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

use async_trait::async_trait;
use bytes::Bytes;
use common::ServiceStream;

use crate::error::RpcError;

/// Ordered, reliable, bidirectional byte frames.
///
/// The engine is the single reader and single writer of a transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	/// Hands out the inbound frame sequence. Callable once; a second call
	/// returns an empty stream.
	fn receive(&self) -> ServiceStream<Bytes>;

	/// Ordered delivery. May fail terminally.
	async fn send(&self, frame: Bytes) -> Result<(), RpcError>;

	fn is_available(&self) -> bool;

	async fn close(&self) -> Result<(), RpcError>;
}

#[cfg(any(test, feature = "testsuite"))]
pub use channel_transport::ChannelTransport;

#[cfg(any(test, feature = "testsuite"))]
mod channel_transport {
	use std::sync::{
		atomic::{AtomicBool, Ordering},
		Mutex,
	};

	use async_trait::async_trait;
	use bytes::Bytes;
	use common::ServiceStream;
	use tokio::sync::mpsc;

	use super::Transport;
	use crate::error::RpcError;

	/// In-memory duplex transport: two cross-wired unbounded channels.
	pub struct ChannelTransport {
		tx: mpsc::UnboundedSender<Bytes>,
		rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
		open: AtomicBool,
	}

	impl ChannelTransport {
		pub fn duplex_pair() -> (ChannelTransport, ChannelTransport) {
			let (left_tx, left_rx) = mpsc::unbounded_channel();
			let (right_tx, right_rx) = mpsc::unbounded_channel();
			let left = ChannelTransport {
				tx: left_tx,
				rx: Mutex::new(Some(right_rx)),
				open: AtomicBool::new(true),
			};
			let right = ChannelTransport {
				tx: right_tx,
				rx: Mutex::new(Some(left_rx)),
				open: AtomicBool::new(true),
			};
			(left, right)
		}
	}

	#[async_trait]
	impl Transport for ChannelTransport {
		fn receive(&self) -> ServiceStream<Bytes> {
			match self.rx.lock().unwrap().take() {
				Some(receiver) => receiver.into(),
				None => ServiceStream::empty(),
			}
		}

		async fn send(&self, frame: Bytes) -> Result<(), RpcError> {
			if !self.open.load(Ordering::SeqCst) {
				return Err(RpcError::TransportClosed);
			}
			self.tx.send(frame).map_err(|_| RpcError::TransportClosed)
		}

		fn is_available(&self) -> bool {
			self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
		}

		async fn close(&self) -> Result<(), RpcError> {
			self.open.store(false, Ordering::SeqCst);
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use bytes::Bytes;
	use futures::StreamExt;

	use super::{ChannelTransport, Transport};

	#[tokio::test]
	async fn test_duplex_pair_delivers_in_order() {
		let (left, right) = ChannelTransport::duplex_pair();
		left.send(Bytes::from_static(b"one")).await.unwrap();
		left.send(Bytes::from_static(b"two")).await.unwrap();
		let mut inbound = right.receive();
		assert_eq!(inbound.next().await.unwrap(), Bytes::from_static(b"one"));
		assert_eq!(inbound.next().await.unwrap(), Bytes::from_static(b"two"));
	}

	#[tokio::test]
	async fn test_send_after_close_fails() {
		let (left, _right) = ChannelTransport::duplex_pair();
		left.close().await.unwrap();
		assert!(!left.is_available());
		assert!(left.send(Bytes::from_static(b"late")).await.is_err());
	}

	#[tokio::test]
	async fn test_receive_is_callable_once() {
		let (left, right) = ChannelTransport::duplex_pair();
		let _inbound = right.receive();
		let mut second = right.receive();
		left.send(Bytes::from_static(b"frame")).await.unwrap();
		assert!(second.next().await.is_none());
	}
}
