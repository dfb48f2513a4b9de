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

use bytes::Bytes;

use crate::{envelope::Envelope, error::RpcError};

/// Converts between envelopes and raw transport frames. Stateless.
pub trait Codec: Send + Sync + 'static {
	fn encode(&self, envelope: &Envelope) -> Result<Bytes, RpcError>;
	fn decode(&self, frame: &[u8]) -> Result<Envelope, RpcError>;
}

/// The default codec: canonical json rendering of the envelope mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
	fn encode(&self, envelope: &Envelope) -> Result<Bytes, RpcError> {
		let frame = serde_json::to_vec(envelope)?;
		Ok(Bytes::from(frame))
	}

	fn decode(&self, frame: &[u8]) -> Result<Envelope, RpcError> {
		let envelope = serde_json::from_slice(frame)?;
		Ok(envelope)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::{Codec, JsonCodec};
	use crate::envelope::{Envelope, EnvelopeKind};

	#[test]
	fn test_json_codec_round_trip() {
		let envelope = Envelope::request("req-1", "calc", "add", json!({"a": 1, "b": 2}));
		let frame = JsonCodec.encode(&envelope).unwrap();
		let decoded = JsonCodec.decode(&frame).unwrap();
		assert_eq!(decoded, envelope);
		assert_eq!(decoded.kind, EnvelopeKind::Request);
	}

	#[test]
	fn test_json_codec_rejects_garbage() {
		assert!(JsonCodec.decode(b"not json at all").is_err());
	}
}
