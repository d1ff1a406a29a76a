//! SCPI over RS-232.
//!
//! Protocol Overview:
//! - 8N1, no flow control, baud rate from configuration
//! - Terminator: LF (\n) on both directions
//! - One response line per query
//!
//! Requires the `instrument_serial` feature.

use super::{InstrumentLink, LinkFault};
use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace, warn};

/// Delay after configuration commands, giving the meter time to apply them
const COMMAND_SETTLE: Duration = Duration::from_millis(50);

/// Port state guarded by the link's mutex.
struct SerialPortState {
    reader: BufReader<SerialStream>,
    /// A query was abandoned before its reply line was read
    reply_pending: bool,
}

impl SerialPortState {
    /// Discard a reply left over from an abandoned query.
    ///
    /// Drops buffered bytes through the next LF. If the reply has not fully
    /// arrived, waits up to `window` for the rest of it.
    async fn resync(&mut self, window: Duration) {
        if !self.reply_pending {
            return;
        }
        let buffer = self.reader.buffer();
        match buffer.iter().position(|b| *b == b'\n') {
            Some(end) => Pin::new(&mut self.reader).consume(end + 1),
            None => {
                let partial = buffer.len();
                Pin::new(&mut self.reader).consume(partial);
                let mut stale = String::new();
                let _ = tokio::time::timeout(window, self.reader.read_line(&mut stale)).await;
                debug!("Discarded stale serial reply {:?}", stale.trim());
            }
        }
        self.reply_pending = false;
    }

    async fn write_line(&mut self, command: &str) -> Result<(), LinkFault> {
        self.reader
            .get_mut()
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| LinkFault::SendFailed(format!("{command}: {e}")))
    }
}

/// SCPI link over a serial port.
pub struct ScpiSerialLink {
    /// Serial port protected by Mutex for exclusive access
    port: Mutex<SerialPortState>,
    /// Query timeout duration
    timeout: Duration,
    name: String,
}

impl ScpiSerialLink {
    /// Open the serial port at `port_path` (e.g. "/dev/ttyUSB0", "COM3").
    pub fn open(port_path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, LinkFault> {
        let port = tokio_serial::new(port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| LinkFault::ConnectionFailed(format!("{port_path}: {e}")))?;

        Ok(Self::from_stream(
            port,
            timeout,
            format!("serial://{port_path}@{baud_rate}"),
        ))
    }

    fn from_stream(stream: SerialStream, timeout: Duration, name: String) -> Self {
        Self {
            port: Mutex::new(SerialPortState {
                reader: BufReader::new(stream),
                reply_pending: false,
            }),
            timeout,
            name,
        }
    }
}

#[async_trait]
impl InstrumentLink for ScpiSerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn configure(&self, command: &str) -> Result<(), LinkFault> {
        let mut port = self.port.lock().await;
        port.resync(self.timeout).await;
        trace!("SCPI write: {:?}", command);
        port.write_line(command).await?;

        tokio::time::sleep(COMMAND_SETTLE).await;
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String, LinkFault> {
        let mut port = self.port.lock().await;
        port.resync(self.timeout).await;
        trace!("SCPI query: {:?}", command);
        port.write_line(command).await?;

        // Stays set if this future is dropped before the reply arrives.
        port.reply_pending = true;
        let mut response = String::new();
        match tokio::time::timeout(self.timeout, port.reader.read_line(&mut response)).await {
            Ok(Ok(_)) => {
                port.reply_pending = false;
                Ok(response.trim().to_string())
            }
            Ok(Err(e)) => Err(LinkFault::Io(e)),
            Err(_) => {
                warn!("{} timed out on {:?}", self.name, command);
                Err(LinkFault::Timeout(command.to_string()))
            }
        }
    }
}
