//! relayrpc Response Types
//!
//! This module defines the response a remote endpoint sends back for a
//! [`Request`](super::Request).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Outcome, RequestId};

/// Error reported by the remote endpoint's own business logic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

/// An RPC response returned from a remote host to the client.
///
/// # Response Flow
///
/// 1. The client writes a `Request` on a pooled connection
/// 2. The remote host processes it and writes back a `Response` with the same id
/// 3. The client's connection reader decodes it and hands it to the lock holder
/// 4. The lock holder finds the waiting call by id and completes it
///
/// # Fields
///
/// - `id`: The request ID this response corresponds to
/// - `result`: The result value (present on success)
/// - `error`: Application error (present on failure)
///
/// # Example
///
/// ```
/// use relayrpc_common::protocol::responses::Response;
/// use serde_json::json;
///
/// let success = Response::success(123, json!({"pi": 3.14159}));
/// let error = Response::error(123, 404, "no such user");
///
/// assert!(success.is_success());
/// assert!(!error.is_success());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Application error (present on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Response {
    /// Creates a successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an application error response.
    ///
    /// # Arguments
    ///
    /// * `id` - The request identifier (must match the request's ID)
    /// * `code` - Application-defined error code
    /// * `message` - Human readable description
    pub fn error(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(RemoteError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the response into the outcome delivered to the caller.
    ///
    /// A response carrying neither a result nor an error is a success with a
    /// `null` payload (a remote method returning nothing).
    pub fn into_outcome(self) -> Outcome {
        match self.error {
            Some(err) => Outcome::ApplicationFailure {
                code: err.code,
                message: err.message,
            },
            None => Outcome::Success(self.result.unwrap_or(Value::Null)),
        }
    }
}
