pub mod error;
pub mod host;
pub mod outcome;
pub mod requests;
pub mod responses;


pub use error::{RelayError, Result};
pub use host::Host;
pub use outcome::{CallError, Outcome, RpcCode};
pub use requests::{Params, Request, RequestId};
pub use responses::{RemoteError, Response};
