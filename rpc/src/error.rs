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

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::marker::StatusCode;

/// Error surface of the rpc engine.
///
/// This is the in-process taxonomy. On the wire an error travels as a
/// `Status` marker; `code()` gives the mapping.
#[derive(Debug, Error)]
pub enum RpcError {
	#[error("invalid argument: {0}")]
	Argument(String),

	#[error("malformed payload: {0}")]
	Format(String),

	#[error("operation timed out: {0}")]
	Timeout(String),

	#[error("illegal state: {0}")]
	IllegalState(String),

	#[error("not implemented: {0}")]
	NotImplemented(String),

	#[error("endpoint closed")]
	TransportClosed,

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("internal error: {0}")]
	Internal(String),

	/// A terminal `Status` received from the peer.
	#[error("RPC Error [{code}]: {message}")]
	Status { code: StatusCode, message: String, details: Option<JsonValue> },

	/// An error raised by a user handler.
	#[error(transparent)]
	Custom(#[from] anyhow::Error),
}

impl RpcError {
	/// Maps the error onto the wire status code used when reporting it to
	/// the peer.
	pub fn code(&self) -> StatusCode {
		match self {
			RpcError::Argument(_) | RpcError::Format(_) => StatusCode::InvalidArgument,
			RpcError::Timeout(_) => StatusCode::DeadlineExceeded,
			RpcError::IllegalState(_) => StatusCode::FailedPrecondition,
			RpcError::NotImplemented(_) => StatusCode::Unimplemented,
			RpcError::Status { code, .. } => *code,
			RpcError::TransportClosed |
			RpcError::Serialization(_) |
			RpcError::Internal(_) |
			RpcError::Custom(_) => StatusCode::Internal,
		}
	}

	pub(crate) fn from_status(code: StatusCode, message: String, details: Option<JsonValue>) -> Self {
		RpcError::Status { code, message, details }
	}

	pub fn is_terminal_status(&self) -> bool {
		matches!(self, RpcError::Status { .. })
	}
}

/// Errors cannot be cloned, yet a single failure may have to be reported to
/// both a request slot and a stream sink. The duplicate keeps the code,
/// message and details of the original.
impl RpcError {
	pub(crate) fn duplicate(&self) -> RpcError {
		match self {
			RpcError::Status { code, message, details } =>
				RpcError::Status { code: *code, message: message.clone(), details: details.clone() },
			RpcError::TransportClosed => RpcError::TransportClosed,
			other => RpcError::from_status(other.code(), other.to_string(), None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::RpcError;
	use crate::marker::StatusCode;

	#[test]
	fn test_error_code_mapping() {
		assert_eq!(RpcError::Argument("x".into()).code(), StatusCode::InvalidArgument);
		assert_eq!(RpcError::Format("x".into()).code(), StatusCode::InvalidArgument);
		assert_eq!(RpcError::Timeout("x".into()).code(), StatusCode::DeadlineExceeded);
		assert_eq!(RpcError::IllegalState("x".into()).code(), StatusCode::FailedPrecondition);
		assert_eq!(RpcError::NotImplemented("x".into()).code(), StatusCode::Unimplemented);
		assert_eq!(RpcError::Internal("x".into()).code(), StatusCode::Internal);
		assert_eq!(
			RpcError::Custom(anyhow::anyhow!("user fault")).code(),
			StatusCode::Internal
		);
	}

	#[test]
	fn test_status_error_rendering() {
		let error = RpcError::Status {
			code: StatusCode::NotFound,
			message: "Method not found: calc.add".to_string(),
			details: None,
		};
		assert_eq!(error.to_string(), "RPC Error [NOT_FOUND]: Method not found: calc.add");
	}

	#[test]
	fn test_transport_closed_rendering() {
		assert_eq!(RpcError::TransportClosed.to_string(), "endpoint closed");
	}

	#[test]
	fn test_duplicate_preserves_status() {
		let error = RpcError::Status {
			code: StatusCode::Cancelled,
			message: "user aborted".to_string(),
			details: None,
		};
		let duplicate = error.duplicate();
		assert_eq!(duplicate.code(), StatusCode::Cancelled);
		assert_eq!(duplicate.to_string(), error.to_string());
	}
}
