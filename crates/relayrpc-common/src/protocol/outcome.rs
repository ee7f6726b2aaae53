//! Call outcomes.
//!
//! Every dispatched call resolves to exactly one [`Outcome`]. Communication
//! failures mean the call never reached the remote logic or never came back;
//! application failures are errors the remote endpoint reported itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Dispatch-level failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcCode {
    /// Every candidate host is marked down
    NoNodeAvailable,
    /// No route is registered for the api
    NoRoute,
    /// The request could not be handed to a connection
    SendFailed,
    /// No response arrived before the deadline
    Timeout,
}

impl RpcCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcCode::NoNodeAvailable => "NO_NODE_AVAILABLE",
            RpcCode::NoRoute => "NO_ROUTE",
            RpcCode::SendFailed => "SEND_FAILED",
            RpcCode::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Success(Value),
    CommunicationFailure { code: RpcCode, message: String },
    ApplicationFailure { code: i32, message: String },
}

impl Outcome {
    pub fn communication(code: RpcCode, message: impl Into<String>) -> Self {
        Outcome::CommunicationFailure {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The dispatch failure code, if this is a communication failure.
    pub fn rpc_code(&self) -> Option<RpcCode> {
        match self {
            Outcome::CommunicationFailure { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Value, CallError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::CommunicationFailure { code, message } => {
                Err(CallError::Communication { code, message })
            }
            Outcome::ApplicationFailure { code, message } => {
                Err(CallError::Application { code, message })
            }
        }
    }
}

/// Error side of [`Outcome::into_result`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("communication failure [{code}]: {message}")]
    Communication { code: RpcCode, message: String },

    #[error("application failure [{code}]: {message}")]
    Application { code: i32, message: String },
}
