use std::future::Future;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::error::{RelayError, Result};
use crate::protocol::{Request, Response};
use crate::transport::codec::JsonCodec;
use crate::transport::tcp::TcpTransportAsync;

/// Replies queued per connection before request tasks start waiting.
const RESPONSE_QUEUE: usize = 256;

/// Async TCP server speaking the relayrpc framing.
///
/// Every request on a connection is handled on its own task, so slow calls
/// do not hold up fast ones and responses may leave in a different order
/// than requests arrived. Clients correlate them by request id.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "0.0.0.0:8080")
    pub async fn new(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RelayError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self { listener })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RelayError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Runs the server with the given request handler.
    ///
    /// Accepts connections in a loop and spawns a task for each one. A
    /// handler error is sent back as an application error (code 500).
    pub async fn run_with_handler<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| RelayError::Connection(format!("Failed to accept connection: {}", e)))?;

            debug!(peer = %peer_addr, "Connection established");

            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handler).await {
                    warn!(peer = %peer_addr, error = %e, "Connection error");
                }
            });
        }
    }
}

/// Handle a single TCP connection until the peer closes it.
async fn handle_connection<F, Fut>(stream: TcpStream, handler: Arc<F>) -> Result<()>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Response>(RESPONSE_QUEUE);

    let write_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let encoded = JsonCodec::encode_response(&response)?;
            TcpTransportAsync::send_message(&mut writer, &encoded).await?;
        }
        Ok::<(), RelayError>(())
    });

    while let Some(frame) = TcpTransportAsync::receive_message(&mut reader).await? {
        let request = match JsonCodec::decode_request(&frame) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "Failed to decode request, dropping frame");
                continue;
            }
        };

        let handler = handler.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let request_id = request.id;
            let response = match handler(request).await {
                Ok(resp) => resp,
                Err(e) => Response::error(request_id, 500, e.to_string()),
            };
            // The writer is gone only when the connection already failed
            let _ = tx.send(response).await;
        });
    }

    debug!("Connection closed by peer");
    drop(tx);
    match write_task.await {
        Ok(result) => result,
        Err(e) => Err(RelayError::Transport(format!("response writer panicked: {}", e))),
    }
}
