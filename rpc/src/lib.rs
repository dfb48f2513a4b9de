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

#![deny(clippy::disallowed_methods)]

//! rpc is the transport-agnostic, bidirectional rpc engine of querent.
//!
//! It multiplexes unary, server-streaming, client-streaming and
//! bidirectional calls over one ordered byte transport:
//! - correlate concurrent in-flight operations by id
//! - enforce at-most-once completion of pending replies
//! - deliver ordered data to per-stream sinks
//! - honor deadlines and cancellation from either peer
//!
//! The transport and the payload codec are pluggable; the engine itself is
//! payload-agnostic and moves `serde_json::Value` at its boundaries.

mod codec;
mod config;
mod dispatcher;
mod endpoint;
mod envelope;
mod error;
mod marker;
pub mod metrics;
mod middleware;
mod registry;
mod request_path;
mod request_table;
mod stream_path;
mod stream_table;
mod transport;


pub use codec::{Codec, JsonCodec};
pub use config::{EndpointConfig, DEFAULT_PING_TIMEOUT};
pub use endpoint::{Endpoint, OpenedStream};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::RpcError;
pub use marker::{ServiceMarker, StatusCode, MARKER_TYPE_FIELD};
pub use middleware::{CallContext, Direction, Middleware, MiddlewareChain};
pub use registry::{
	HandlerContext, HandlerFuture, HandlerInvoker, HandlerReply, MethodDescriptor, MethodKind,
	MethodRegistry,
};
pub use request_table::{PendingReply, RequestSlot, RequestTable};
pub use stream_table::{QueueCapacity, StreamEvent, StreamReader, StreamSink, StreamTable};
#[cfg(any(test, feature = "testsuite"))]
pub use transport::ChannelTransport;
pub use transport::Transport;
