use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};

use crate::protocol::error::{RelayError, Result};

/// Largest frame a reader accepts (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Async TCP transport for relayrpc.
///
/// Connects to remote hosts and moves length-prefixed frames over any tokio
/// stream, including the halves of a split `TcpStream`, so one task can
/// write requests while another reads responses.
///
/// # Wire Protocol
///
/// ```text
/// [4-byte length, u32 big-endian] [JSON data]
/// ```
///
/// # Example
///
/// ```no_run
/// use relayrpc_common::transport::{JsonCodec, TcpTransportAsync};
/// use relayrpc_common::protocol::{Params, Request};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut stream = TcpTransportAsync::connect("127.0.0.1:8080", Duration::from_secs(3)).await?;
///
/// let request = Request::new("compute", Params::Json("{}".into()));
/// TcpTransportAsync::send_message(&mut stream, &JsonCodec::encode_request(&request)?).await?;
/// let frame = TcpTransportAsync::receive_message(&mut stream).await?;
/// # Ok(())
/// # }
/// ```
pub struct TcpTransportAsync;

impl TcpTransportAsync {
    /// Connects to a remote endpoint.
    ///
    /// The address may resolve to several socket addresses; each is tried in
    /// turn until one accepts. Resolution runs off the async workers, and the
    /// whole attempt including it is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// - `Connection` if the address cannot be resolved or every attempt fails
    /// - `Timeout` if no attempt succeeded within `timeout`
    pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
        let attempt = async {
            let socket_addrs = lookup_host(addr)
                .await
                .map_err(|e| RelayError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

            let mut last_err = None;
            for socket_addr in socket_addrs {
                match TcpStream::connect(&socket_addr).await {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        return Ok(stream);
                    }
                    Err(e) => {
                        last_err = Some(e);
                    }
                }
            }

            Err::<TcpStream, RelayError>(RelayError::Connection(format!(
                "Failed to connect to {}: {}",
                addr,
                last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no addresses resolved".to_string())
            )))
        };

        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| RelayError::Timeout(timeout.as_millis() as u64))?
    }

    /// Sends a message with length prefix.
    pub async fn send_message<W>(writer: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(RelayError::InvalidRequest(format!(
                "Message too large: {} bytes (max {} bytes)",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        let len = data.len() as u32;

        writer
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| Self::map_io_error(e, "writing length prefix"))?;

        writer
            .write_all(data)
            .await
            .map_err(|e| Self::map_io_error(e, "writing data"))?;

        writer
            .flush()
            .await
            .map_err(|e| Self::map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Receives a message with length prefix.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly at a
    /// frame boundary.
    ///
    /// # Errors
    ///
    /// - the connection drops in the middle of a frame
    /// - the frame exceeds [`MAX_MESSAGE_SIZE`]
    pub async fn receive_message<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Self::map_io_error(e, "reading length prefix")),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(RelayError::InvalidResponse(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| Self::map_io_error(e, "reading data"))?;

        Ok(Some(buf))
    }

    /// Map IO errors to appropriate RelayError variants
    fn map_io_error(err: std::io::Error, context: &str) -> RelayError {
        match err.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof => {
                RelayError::Connection(format!("{}: Connection lost", context))
            }
            _ => RelayError::Io(err),
        }
    }
}
