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

use std::fmt;

use serde_json::{json, Map, Value as JsonValue};

use crate::error::RpcError;

/// Field on a payload object that discriminates a service marker from
/// user data.
pub const MARKER_TYPE_FIELD: &str = "_marker_type";

/// Wire status codes.
///
/// This is a Rosetta Stone between the in-process error taxonomy and the
/// in-band `Status` markers. The numeric mapping is stable; every code
/// round-trips through both its name and its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
	Ok,
	Cancelled,
	Unknown,
	InvalidArgument,
	DeadlineExceeded,
	NotFound,
	AlreadyExists,
	PermissionDenied,
	ResourceExhausted,
	FailedPrecondition,
	Aborted,
	OutOfRange,
	Unimplemented,
	Internal,
	Unavailable,
	DataLoss,
	Unauthenticated,
}

impl StatusCode {
	pub const ALL: [StatusCode; 17] = [
		StatusCode::Ok,
		StatusCode::Cancelled,
		StatusCode::Unknown,
		StatusCode::InvalidArgument,
		StatusCode::DeadlineExceeded,
		StatusCode::NotFound,
		StatusCode::AlreadyExists,
		StatusCode::PermissionDenied,
		StatusCode::ResourceExhausted,
		StatusCode::FailedPrecondition,
		StatusCode::Aborted,
		StatusCode::OutOfRange,
		StatusCode::Unimplemented,
		StatusCode::Internal,
		StatusCode::Unavailable,
		StatusCode::DataLoss,
		StatusCode::Unauthenticated,
	];

	pub fn name(&self) -> &'static str {
		match self {
			StatusCode::Ok => "OK",
			StatusCode::Cancelled => "CANCELLED",
			StatusCode::Unknown => "UNKNOWN",
			StatusCode::InvalidArgument => "INVALID_ARGUMENT",
			StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
			StatusCode::NotFound => "NOT_FOUND",
			StatusCode::AlreadyExists => "ALREADY_EXISTS",
			StatusCode::PermissionDenied => "PERMISSION_DENIED",
			StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
			StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
			StatusCode::Aborted => "ABORTED",
			StatusCode::OutOfRange => "OUT_OF_RANGE",
			StatusCode::Unimplemented => "UNIMPLEMENTED",
			StatusCode::Internal => "INTERNAL",
			StatusCode::Unavailable => "UNAVAILABLE",
			StatusCode::DataLoss => "DATA_LOSS",
			StatusCode::Unauthenticated => "UNAUTHENTICATED",
		}
	}

	pub fn as_number(&self) -> u32 {
		match self {
			StatusCode::Ok => 0,
			StatusCode::Cancelled => 1,
			StatusCode::Unknown => 2,
			StatusCode::InvalidArgument => 3,
			StatusCode::DeadlineExceeded => 4,
			StatusCode::NotFound => 5,
			StatusCode::AlreadyExists => 6,
			StatusCode::PermissionDenied => 7,
			StatusCode::ResourceExhausted => 8,
			StatusCode::FailedPrecondition => 9,
			StatusCode::Aborted => 10,
			StatusCode::OutOfRange => 11,
			StatusCode::Unimplemented => 12,
			StatusCode::Internal => 13,
			StatusCode::Unavailable => 14,
			StatusCode::DataLoss => 15,
			StatusCode::Unauthenticated => 16,
		}
	}

	pub fn from_name(name: &str) -> Option<StatusCode> {
		StatusCode::ALL.iter().copied().find(|code| code.name() == name)
	}

	pub fn from_number(number: u32) -> Option<StatusCode> {
		StatusCode::ALL.iter().copied().find(|code| code.as_number() == number)
	}
}

impl fmt::Display for StatusCode {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// In-band control values embedded as payloads.
///
/// A marker serializes as a mapping carrying [`MARKER_TYPE_FIELD`] with the
/// marker's kind; everything else on the mapping is kind-specific.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMarker {
	Status { code: StatusCode, message: String, details: Option<JsonValue> },
	Deadline { epoch_ms: u64 },
	Cancel { operation_id: String, reason: Option<String>, details: Option<JsonValue> },
	Ping { timestamp: u64 },
	Pong { original_timestamp: u64, response_timestamp: u64 },
	ClientStreamEnd,
	ServerStreamEnd,
	ChannelClosed,
	Headers { entries: Map<String, JsonValue> },
	Trailers { entries: Map<String, JsonValue> },
	ClientStreamingInit { stream_id: String, params: Option<JsonValue> },
	BidirectionalInit { stream_id: String, params: Option<JsonValue> },
	HealthCheck,
	FlowControl,
	Compression,
}

impl ServiceMarker {
	pub fn kind(&self) -> &'static str {
		match self {
			ServiceMarker::Status { .. } => "status",
			ServiceMarker::Deadline { .. } => "deadline",
			ServiceMarker::Cancel { .. } => "cancel",
			ServiceMarker::Ping { .. } => "ping",
			ServiceMarker::Pong { .. } => "pong",
			ServiceMarker::ClientStreamEnd => "client_stream_end",
			ServiceMarker::ServerStreamEnd => "server_stream_end",
			ServiceMarker::ChannelClosed => "channel_closed",
			ServiceMarker::Headers { .. } => "headers",
			ServiceMarker::Trailers { .. } => "trailers",
			ServiceMarker::ClientStreamingInit { .. } => "client_streaming_init",
			ServiceMarker::BidirectionalInit { .. } => "bidirectional_init",
			ServiceMarker::HealthCheck => "health_check",
			ServiceMarker::FlowControl => "flow_control",
			ServiceMarker::Compression => "compression",
		}
	}

	pub fn status(code: StatusCode, message: impl Into<String>) -> ServiceMarker {
		ServiceMarker::Status { code, message: message.into(), details: None }
	}

	pub fn to_value(&self) -> JsonValue {
		let mut mapping = Map::new();
		mapping.insert(MARKER_TYPE_FIELD.to_string(), json!(self.kind()));
		match self {
			ServiceMarker::Status { code, message, details } => {
				mapping.insert("code".to_string(), json!(code.name()));
				mapping.insert("message".to_string(), json!(message));
				if let Some(details) = details {
					mapping.insert("details".to_string(), details.clone());
				}
			},
			ServiceMarker::Deadline { epoch_ms } => {
				mapping.insert("epoch_ms".to_string(), json!(epoch_ms));
			},
			ServiceMarker::Cancel { operation_id, reason, details } => {
				mapping.insert("operation_id".to_string(), json!(operation_id));
				if let Some(reason) = reason {
					mapping.insert("reason".to_string(), json!(reason));
				}
				if let Some(details) = details {
					mapping.insert("details".to_string(), details.clone());
				}
			},
			ServiceMarker::Ping { timestamp } => {
				mapping.insert("timestamp".to_string(), json!(timestamp));
			},
			ServiceMarker::Pong { original_timestamp, response_timestamp } => {
				mapping.insert("original_timestamp".to_string(), json!(original_timestamp));
				mapping.insert("response_timestamp".to_string(), json!(response_timestamp));
			},
			ServiceMarker::Headers { entries } | ServiceMarker::Trailers { entries } => {
				mapping.insert("entries".to_string(), JsonValue::Object(entries.clone()));
			},
			ServiceMarker::ClientStreamingInit { stream_id, params } |
			ServiceMarker::BidirectionalInit { stream_id, params } => {
				mapping.insert("stream_id".to_string(), json!(stream_id));
				if let Some(params) = params {
					mapping.insert("params".to_string(), params.clone());
				}
			},
			ServiceMarker::ClientStreamEnd |
			ServiceMarker::ServerStreamEnd |
			ServiceMarker::ChannelClosed |
			ServiceMarker::HealthCheck |
			ServiceMarker::FlowControl |
			ServiceMarker::Compression => {},
		}
		JsonValue::Object(mapping)
	}

	/// Recognizes a marker on a payload.
	///
	/// `Ok(None)` means the payload is plain user data. An `Err` means the
	/// payload claims to be a marker but does not decode as one; callers
	/// degrade it to user data after logging.
	pub fn from_value(payload: &JsonValue) -> Result<Option<ServiceMarker>, RpcError> {
		let Some(mapping) = payload.as_object() else {
			return Ok(None);
		};
		let Some(kind_value) = mapping.get(MARKER_TYPE_FIELD) else {
			return Ok(None);
		};
		let Some(kind) = kind_value.as_str() else {
			return Err(RpcError::Format(format!(
				"marker discriminator is not a string: {kind_value}"
			)));
		};
		let marker = match kind {
			"status" => {
				let code_name = require_str(mapping, "code")?;
				let code = StatusCode::from_name(code_name).ok_or_else(|| {
					RpcError::Format(format!("unrecognized status code: {code_name}"))
				})?;
				ServiceMarker::Status {
					code,
					message: require_str(mapping, "message")?.to_string(),
					details: mapping.get("details").cloned(),
				}
			},
			"deadline" => ServiceMarker::Deadline { epoch_ms: require_u64(mapping, "epoch_ms")? },
			"cancel" => ServiceMarker::Cancel {
				operation_id: require_str(mapping, "operation_id")?.to_string(),
				reason: mapping.get("reason").and_then(JsonValue::as_str).map(str::to_string),
				details: mapping.get("details").cloned(),
			},
			"ping" => ServiceMarker::Ping { timestamp: require_u64(mapping, "timestamp")? },
			"pong" => ServiceMarker::Pong {
				original_timestamp: require_u64(mapping, "original_timestamp")?,
				response_timestamp: require_u64(mapping, "response_timestamp")?,
			},
			"client_stream_end" => ServiceMarker::ClientStreamEnd,
			"server_stream_end" => ServiceMarker::ServerStreamEnd,
			"channel_closed" => ServiceMarker::ChannelClosed,
			"headers" => ServiceMarker::Headers { entries: require_map(mapping, "entries")? },
			"trailers" => ServiceMarker::Trailers { entries: require_map(mapping, "entries")? },
			"client_streaming_init" => ServiceMarker::ClientStreamingInit {
				stream_id: require_str(mapping, "stream_id")?.to_string(),
				params: mapping.get("params").cloned(),
			},
			"bidirectional_init" => ServiceMarker::BidirectionalInit {
				stream_id: require_str(mapping, "stream_id")?.to_string(),
				params: mapping.get("params").cloned(),
			},
			"health_check" => ServiceMarker::HealthCheck,
			"flow_control" => ServiceMarker::FlowControl,
			"compression" => ServiceMarker::Compression,
			unrecognized =>
				return Err(RpcError::Format(format!("unrecognized marker kind: {unrecognized}"))),
		};
		Ok(Some(marker))
	}
}

fn require_str<'a>(mapping: &'a Map<String, JsonValue>, field: &str) -> Result<&'a str, RpcError> {
	mapping
		.get(field)
		.and_then(JsonValue::as_str)
		.ok_or_else(|| RpcError::Format(format!("marker field `{field}` missing or not a string")))
}

fn require_u64(mapping: &Map<String, JsonValue>, field: &str) -> Result<u64, RpcError> {
	mapping
		.get(field)
		.and_then(JsonValue::as_u64)
		.ok_or_else(|| RpcError::Format(format!("marker field `{field}` missing or not a number")))
}

fn require_map(
	mapping: &Map<String, JsonValue>,
	field: &str,
) -> Result<Map<String, JsonValue>, RpcError> {
	mapping
		.get(field)
		.and_then(JsonValue::as_object)
		.cloned()
		.ok_or_else(|| RpcError::Format(format!("marker field `{field}` missing or not a mapping")))
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;
	use serde_json::json;

	use super::{ServiceMarker, StatusCode, MARKER_TYPE_FIELD};

	#[test]
	fn test_status_code_round_trip() {
		for code in StatusCode::ALL {
			assert_eq!(StatusCode::from_name(code.name()), Some(code));
			assert_eq!(StatusCode::from_number(code.as_number()), Some(code));
		}
		assert_eq!(StatusCode::Ok.as_number(), 0);
		assert_eq!(StatusCode::Unauthenticated.as_number(), 16);
	}

	#[test]
	fn test_plain_data_is_not_a_marker() {
		assert_eq!(ServiceMarker::from_value(&json!({"a": 1})).unwrap(), None);
		assert_eq!(ServiceMarker::from_value(&json!("hello")).unwrap(), None);
		assert_eq!(ServiceMarker::from_value(&json!(42)).unwrap(), None);
	}

	#[test]
	fn test_malformed_marker_is_an_error() {
		let missing_field = json!({ MARKER_TYPE_FIELD: "deadline" });
		assert!(ServiceMarker::from_value(&missing_field).is_err());
		let unknown_kind = json!({ MARKER_TYPE_FIELD: "teleport" });
		assert!(ServiceMarker::from_value(&unknown_kind).is_err());
	}

	#[test]
	fn test_status_marker_fields() {
		let marker = ServiceMarker::Status {
			code: StatusCode::DeadlineExceeded,
			message: "too slow".to_string(),
			details: Some(json!({"error": "sleep"})),
		};
		let value = marker.to_value();
		assert_eq!(value["code"], json!("DEADLINE_EXCEEDED"));
		assert_eq!(value["message"], json!("too slow"));
		assert_eq!(ServiceMarker::from_value(&value).unwrap(), Some(marker));
	}

	fn arb_status_code() -> impl Strategy<Value = StatusCode> {
		prop::sample::select(StatusCode::ALL.to_vec())
	}

	fn arb_marker() -> impl Strategy<Value = ServiceMarker> {
		let unit_markers = prop::sample::select(vec![
			ServiceMarker::ClientStreamEnd,
			ServiceMarker::ServerStreamEnd,
			ServiceMarker::ChannelClosed,
			ServiceMarker::HealthCheck,
			ServiceMarker::FlowControl,
			ServiceMarker::Compression,
		]);
		prop_oneof![
			(arb_status_code(), ".*").prop_map(|(code, message)| ServiceMarker::Status {
				code,
				message,
				details: None
			}),
			any::<u64>().prop_map(|epoch_ms| ServiceMarker::Deadline { epoch_ms }),
			("[a-z0-9-]{1,24}", prop::option::of(".*")).prop_map(|(operation_id, reason)| {
				ServiceMarker::Cancel { operation_id, reason, details: None }
			}),
			any::<u64>().prop_map(|timestamp| ServiceMarker::Ping { timestamp }),
			(any::<u64>(), any::<u64>()).prop_map(|(original_timestamp, response_timestamp)| {
				ServiceMarker::Pong { original_timestamp, response_timestamp }
			}),
			unit_markers,
			"[a-z0-9-]{1,24}".prop_map(|stream_id| ServiceMarker::ClientStreamingInit {
				stream_id,
				params: None
			}),
			"[a-z0-9-]{1,24}".prop_map(|stream_id| ServiceMarker::BidirectionalInit {
				stream_id,
				params: None
			}),
		]
	}

	proptest! {
		#[test]
		fn proptest_marker_round_trip(marker in arb_marker()) {
			let value = marker.to_value();
			let decoded = ServiceMarker::from_value(&value).unwrap();
			prop_assert_eq!(decoded, Some(marker));
		}
	}
}
