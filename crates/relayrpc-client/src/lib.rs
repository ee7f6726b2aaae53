pub mod client;
pub mod completion;
pub mod config;
pub mod future;
pub mod health;
pub mod host_picker;
pub mod lock_holder;
pub mod locker;
pub mod route;
pub mod sender;
pub mod session;
pub mod tcp_session;

pub use client::{ClientBuilder, RpcClient, TcpClient};
pub use completion::Completion;
pub use config::{ClientConfig, EnvSettings, MapSettings, SessionConfig, Settings};
pub use future::RpcFuture;
pub use health::{HealthCheckConfig, HealthGate, HostChecker};
pub use host_picker::HostPicker;
pub use lock_holder::{LockHolder, LockHolderStats};
pub use locker::{Callback, RpcLocker};
pub use route::{Resolution, RouteTable, Routes, RpcRoute};
pub use sender::Sender;
pub use session::{Connection, SessionProvider, WriteStatus, WriteTicket};
pub use tcp_session::{TcpSession, TcpSessionProvider};
