use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Call parameters, already serialized by the caller side.
///
/// Exactly one shape is carried per request: either an ordered list of
/// JSON-encoded arguments, or a single JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Params {
    /// Positional arguments, each one a JSON text
    Array(Vec<String>),
    /// One JSON object or string
    Json(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub api: String,
    pub params: Params,
}

impl Request {
    /// Builds a request with a freshly minted id.
    pub fn new(api: impl Into<String>, params: Params) -> Self {
        Request {
            id: generate_request_id(),
            api: api.into(),
            params,
        }
    }
}

/// Ids are process-unique and strictly increasing.
fn generate_request_id() -> RequestId {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}
