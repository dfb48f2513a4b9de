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

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::marker::ServiceMarker;

/// A single framed message crossing the transport.
///
/// One `id` scopes both a request and its stream, if any. For any id, at
/// most one `Response` or terminal `Error` is ever sent by the responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: EnvelopeKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub service: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	#[serde(default)]
	pub payload: JsonValue,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub header_metadata: Map<String, JsonValue>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub trailer_metadata: Map<String, JsonValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub debug_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
	Request,
	Response,
	StreamData,
	StreamEnd,
	Error,
	Ping,
	Pong,
	#[serde(other)]
	Unknown,
}

impl Envelope {
	fn new(id: impl Into<String>, kind: EnvelopeKind, payload: JsonValue) -> Envelope {
		Envelope {
			id: id.into(),
			kind,
			service: None,
			method: None,
			payload,
			header_metadata: Map::new(),
			trailer_metadata: Map::new(),
			debug_label: None,
		}
	}

	pub fn request(
		id: impl Into<String>,
		service: impl Into<String>,
		method: impl Into<String>,
		payload: JsonValue,
	) -> Envelope {
		let mut envelope = Envelope::new(id, EnvelopeKind::Request, payload);
		envelope.service = Some(service.into());
		envelope.method = Some(method.into());
		envelope
	}

	pub fn response(id: impl Into<String>, payload: JsonValue) -> Envelope {
		Envelope::new(id, EnvelopeKind::Response, payload)
	}

	pub fn stream_data(
		id: impl Into<String>,
		service: Option<String>,
		method: Option<String>,
		payload: JsonValue,
	) -> Envelope {
		let mut envelope = Envelope::new(id, EnvelopeKind::StreamData, payload);
		envelope.service = service;
		envelope.method = method;
		envelope
	}

	pub fn stream_end(id: impl Into<String>) -> Envelope {
		Envelope::new(id, EnvelopeKind::StreamEnd, JsonValue::Null)
	}

	/// Legacy error envelope. The code rides along so that consumers which
	/// only understand `Error` envelopes still observe the right status.
	pub fn error(id: impl Into<String>, message: &str, code: Option<&str>) -> Envelope {
		let mut payload = Map::new();
		payload.insert("message".to_string(), json!(message));
		if let Some(code) = code {
			payload.insert("code".to_string(), json!(code));
		}
		Envelope::new(id, EnvelopeKind::Error, JsonValue::Object(payload))
	}

	pub fn ping(id: impl Into<String>, marker: &ServiceMarker) -> Envelope {
		Envelope::new(id, EnvelopeKind::Ping, marker.to_value())
	}

	pub fn pong(id: impl Into<String>, payload: JsonValue) -> Envelope {
		Envelope::new(id, EnvelopeKind::Pong, payload)
	}

	pub fn with_header_metadata(mut self, metadata: Map<String, JsonValue>) -> Envelope {
		self.header_metadata = metadata;
		self
	}

	pub fn with_trailer_metadata(mut self, metadata: Map<String, JsonValue>) -> Envelope {
		self.trailer_metadata = metadata;
		self
	}

	pub fn with_debug_label(mut self, debug_label: Option<String>) -> Envelope {
		self.debug_label = debug_label;
		self
	}

	/// Extracts `(message, code)` from a legacy error payload.
	///
	/// Tolerates both the mapping shape produced by [`Envelope::error`] and
	/// a bare string payload from older peers.
	pub fn error_payload(&self) -> (String, Option<String>) {
		match &self.payload {
			JsonValue::Object(mapping) => {
				let message = mapping
					.get("message")
					.and_then(JsonValue::as_str)
					.unwrap_or("unknown error")
					.to_string();
				let code =
					mapping.get("code").and_then(JsonValue::as_str).map(str::to_string);
				(message, code)
			},
			JsonValue::String(message) => (message.clone(), None),
			other => (other.to_string(), None),
		}
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;
	use serde_json::{json, Map, Value as JsonValue};

	use super::{Envelope, EnvelopeKind};

	#[test]
	fn test_kind_wire_names() {
		for (kind, wire_name) in [
			(EnvelopeKind::Request, "request"),
			(EnvelopeKind::Response, "response"),
			(EnvelopeKind::StreamData, "stream_data"),
			(EnvelopeKind::StreamEnd, "stream_end"),
			(EnvelopeKind::Error, "error"),
			(EnvelopeKind::Ping, "ping"),
			(EnvelopeKind::Pong, "pong"),
		] {
			assert_eq!(serde_json::to_value(kind).unwrap(), json!(wire_name));
			assert_eq!(
				serde_json::from_value::<EnvelopeKind>(json!(wire_name)).unwrap(),
				kind
			);
		}
	}

	#[test]
	fn test_unrecognized_kind_decodes_to_unknown() {
		let kind: EnvelopeKind = serde_json::from_value(json!("hologram")).unwrap();
		assert_eq!(kind, EnvelopeKind::Unknown);
	}

	#[test]
	fn test_missing_optional_fields_decode() {
		let envelope: Envelope =
			serde_json::from_value(json!({"id": "req-1", "type": "request"})).unwrap();
		assert_eq!(envelope.id, "req-1");
		assert_eq!(envelope.payload, JsonValue::Null);
		assert!(envelope.header_metadata.is_empty());
	}

	#[test]
	fn test_error_payload_shapes() {
		let envelope = Envelope::error("req-1", "boom", Some("NOT_FOUND"));
		assert_eq!(envelope.error_payload(), ("boom".to_string(), Some("NOT_FOUND".to_string())));
		let bare = Envelope::new("req-1".to_string(), EnvelopeKind::Error, json!("plain"));
		assert_eq!(bare.error_payload(), ("plain".to_string(), None));
	}

	fn arb_kind() -> impl Strategy<Value = EnvelopeKind> {
		prop::sample::select(vec![
			EnvelopeKind::Request,
			EnvelopeKind::Response,
			EnvelopeKind::StreamData,
			EnvelopeKind::StreamEnd,
			EnvelopeKind::Error,
			EnvelopeKind::Ping,
			EnvelopeKind::Pong,
		])
	}

	fn arb_metadata() -> impl Strategy<Value = Map<String, JsonValue>> {
		prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}", 0..4).prop_map(|entries| {
			entries.into_iter().map(|(key, value)| (key, json!(value))).collect()
		})
	}

	fn arb_envelope() -> impl Strategy<Value = Envelope> {
		(
			"[a-z0-9-]{1,24}",
			arb_kind(),
			prop::option::of("[a-z]{1,12}"),
			prop::option::of("[a-z]{1,12}"),
			arb_metadata(),
			arb_metadata(),
		)
			.prop_map(|(id, kind, service, method, header_metadata, trailer_metadata)| {
				Envelope {
					id,
					kind,
					service,
					method,
					payload: json!({"value": 42}),
					header_metadata,
					trailer_metadata,
					debug_label: None,
				}
			})
	}

	proptest! {
		// encode(decode(bytes)) == bytes over engine-produced frames, via
		// the canonical json rendering.
		#[test]
		fn proptest_envelope_round_trip(envelope in arb_envelope()) {
			let encoded = serde_json::to_vec(&envelope).unwrap();
			let decoded: Envelope = serde_json::from_slice(&encoded).unwrap();
			prop_assert_eq!(&decoded, &envelope);
			let re_encoded = serde_json::to_vec(&decoded).unwrap();
			prop_assert_eq!(re_encoded, encoded);
		}
	}
}
