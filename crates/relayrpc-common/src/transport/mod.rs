//! relayrpc Transport Layer
//!
//! This module provides TCP framing and codecs for sending/receiving RPC messages.
//!
//! # Architecture
//!
//! - **Transport**: long-lived TCP connections, requests and responses
//!   multiplexed and correlated by request id
//! - **Codec**: JSON serialization for protocol messages
//! - **Wire Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//!
//! # Components
//!
//! - **[`JsonCodec`]**: Encode/decode protocol messages to JSON
//! - **[`TcpTransportAsync`]**: connect plus framed read/write on any tokio stream half
//! - **[`TcpServer`]**: Async TCP server answering requests through a handler
//!
//! # Message Size Limits
//!
//! All readers enforce a maximum message size of 100 MB.

pub mod codec;
pub mod tcp;
pub mod tcp_server;

pub use codec::JsonCodec;
pub use tcp::{TcpTransportAsync, MAX_MESSAGE_SIZE};
pub use tcp_server::TcpServer;
