//! relayrpc Common Types and Transport
//!
//! This crate provides the protocol definitions and TCP transport layer
//! shared by the relayrpc client and the test/echo server.
//!
//! # Overview
//!
//! - **Protocol Layer**: [`Request`], [`Response`], [`Host`], the call
//!   [`Outcome`] taxonomy and the [`RelayError`] type
//! - **Transport Layer**: length-prefixed JSON framing over TCP
//!
//! # Wire Format
//!
//! - **Transport**: TCP, one long-lived connection per remote host
//! - **Serialization**: JSON
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Max Message Size**: 100 MB
//!
//! # Example
//!
//! ```
//! use relayrpc_common::{Outcome, Params, Request, Response};
//! use serde_json::json;
//!
//! let request = Request::new("user.get", Params::Json(r#"{"id":7}"#.into()));
//! let response = Response::success(request.id, json!({"name": "ann"}));
//!
//! assert!(matches!(response.into_outcome(), Outcome::Success(_)));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
