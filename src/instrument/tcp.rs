//! SCPI over raw TCP sockets.
//!
//! LAN-equipped bench instruments expose their SCPI parser on a plain TCP
//! socket (conventionally port 5025). Commands are terminated with LF and each
//! query is answered with a single LF-terminated line.

use super::{InstrumentLink, LinkFault};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Default raw-socket SCPI port
pub const DEFAULT_PORT: u16 = 5025;

/// Delay after configuration commands, giving the parser time to settle
const COMMAND_SETTLE: Duration = Duration::from_millis(10);

/// Async SCPI client for a single LAN instrument.
///
/// A query that times out or is cancelled leaves its reply in flight, so the
/// connection is dropped and the next command opens a fresh one. Readings
/// therefore always answer the query that asked for them.
pub struct ScpiTcpLink {
    /// `None` after a failed or abandoned exchange
    stream: Mutex<Option<BufReader<TcpStream>>>,
    address: String,
    timeout: Duration,
    name: String,
}

impl ScpiTcpLink {
    /// Connect to `address`, which is `host:port` or a bare host (port 5025).
    ///
    /// `timeout` bounds both the connection attempt and every query.
    pub async fn connect(address: &str, timeout_after: Duration) -> Result<Self, LinkFault> {
        let address = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, DEFAULT_PORT)
        };

        let stream = Self::open(&address, timeout_after).await?;
        debug!("Connected to SCPI instrument at {}", address);

        Ok(Self {
            stream: Mutex::new(Some(stream)),
            name: format!("tcp://{address}"),
            address,
            timeout: timeout_after,
        })
    }

    async fn open(
        address: &str,
        timeout_after: Duration,
    ) -> Result<BufReader<TcpStream>, LinkFault> {
        let stream = timeout(timeout_after, TcpStream::connect(address))
            .await
            .map_err(|_| LinkFault::ConnectionFailed(format!("connection timeout to {address}")))?
            .map_err(|e| LinkFault::ConnectionFailed(format!("{address}: {e}")))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        Ok(BufReader::new(stream))
    }

    /// Take the open connection out of `slot`, reconnecting if it was dropped.
    async fn checkout(
        &self,
        slot: &mut Option<BufReader<TcpStream>>,
    ) -> Result<BufReader<TcpStream>, LinkFault> {
        match slot.take() {
            Some(stream) => Ok(stream),
            None => {
                debug!("Reopening SCPI connection to {}", self.address);
                Self::open(&self.address, self.timeout).await
            }
        }
    }

    async fn write_line(
        stream: &mut BufReader<TcpStream>,
        command: &str,
    ) -> Result<(), LinkFault> {
        let line = format!("{}\n", command);
        stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| LinkFault::SendFailed(format!("{command}: {e}")))?;
        stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| LinkFault::SendFailed(format!("{command}: {e}")))
    }
}

#[async_trait]
impl InstrumentLink for ScpiTcpLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn configure(&self, command: &str) -> Result<(), LinkFault> {
        let mut slot = self.stream.lock().await;
        let mut stream = self.checkout(&mut slot).await?;
        trace!("SCPI write: {:?}", command);
        Self::write_line(&mut stream, command).await?;
        *slot = Some(stream);
        tokio::time::sleep(COMMAND_SETTLE).await;
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String, LinkFault> {
        let mut slot = self.stream.lock().await;
        // Checked out for the whole exchange; only a complete reply puts it back.
        let mut stream = self.checkout(&mut slot).await?;
        trace!("SCPI query: {:?}", command);
        Self::write_line(&mut stream, command).await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(LinkFault::QueryFailed("connection closed by device".into())),
            Ok(Ok(_)) => {
                *slot = Some(stream);
                let trimmed = response.trim().to_string();
                trace!("SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(LinkFault::Io(e)),
            Err(_) => {
                warn!("{} timed out on {:?}, reconnecting", self.name, command);
                Err(LinkFault::Timeout(command.to_string()))
            }
        }
    }
}
