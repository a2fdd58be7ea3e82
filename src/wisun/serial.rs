//! # SK Serial Line Transport
//!
//! The SK command protocol is line oriented: commands go out as CR+LF
//! terminated ASCII lines (plus one raw binary payload for `SKSENDTO`) and
//! responses come back as lines. This module is the only place that touches
//! the physical channel. It provides:
//!
//! - [`SerialPort`]: the byte-stream abstraction, implemented for
//!   `tokio_serial::SerialStream` and for the mock port used in tests;
//! - [`OpenAsync`]: how a concrete port type is opened from settings;
//! - [`LineTransport`]: buffered "write command line / read one line with
//!   timeout" on top of any `SerialPort`.

use crate::constants::READ_TIMEOUT_MS;
use crate::error::BRouteError;
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

/// Trait for the underlying serial port byte stream.
#[async_trait]
pub trait SerialPort: AsyncRead + AsyncWrite + Unpin + Send {
    async fn flush_port(&mut self) -> Result<(), std::io::Error>;
}

#[async_trait]
impl SerialPort for tokio_serial::SerialStream {
    async fn flush_port(&mut self) -> Result<(), std::io::Error> {
        AsyncWriteExt::flush(self).await
    }
}

/// Configuration for the serial connection to the dongle.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baudrate: u32,
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 115200,
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
        }
    }
}

/// Trait for port types that can be opened from [`SerialSettings`].
///
/// Keeps the dongle driver generic: production code opens a
/// `tokio_serial::SerialStream`, tests inject a mock port instead.
#[async_trait]
pub trait OpenAsync: SerialPort + Sized {
    async fn open_port(settings: &SerialSettings) -> Result<Self, BRouteError>;
}

#[async_trait]
impl OpenAsync for tokio_serial::SerialStream {
    async fn open_port(settings: &SerialSettings) -> Result<Self, BRouteError> {
        tokio_serial::new(&settings.port, settings.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(settings.read_timeout)
            .open_native_async()
            .map_err(|e| BRouteError::SerialPortError(e.to_string()))
    }
}

/// Buffered line-oriented transport over a [`SerialPort`].
pub struct LineTransport<P: SerialPort> {
    port: P,
    read_timeout: Duration,
    buf: BytesMut,
}

impl<P: SerialPort> LineTransport<P> {
    pub fn new(port: P, read_timeout: Duration) -> Self {
        LineTransport {
            port,
            read_timeout,
            buf: BytesMut::with_capacity(1024),
        }
    }

    /// Writes one command line, appending the CR+LF terminator.
    pub async fn write_line(&mut self, cmd: &str) -> Result<(), BRouteError> {
        let mut data = Vec::with_capacity(cmd.len() + 2);
        data.extend_from_slice(cmd.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.write_raw(&data).await
    }

    /// Writes raw bytes without a terminator. Used for `SKSENDTO`, whose
    /// binary payload follows the command header immediately.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<(), BRouteError> {
        self.port
            .write_all(data)
            .await
            .map_err(|e| BRouteError::SerialPortError(e.to_string()))?;
        self.port
            .flush_port()
            .await
            .map_err(|e| BRouteError::SerialPortError(e.to_string()))
    }

    /// Reads one line, stripped of its CR/LF terminator.
    ///
    /// Returns `Ok(None)` when no complete line arrives within the read
    /// timeout; the wait-loop budgets in the driver are counted in units of
    /// these empty reads. Bytes of a partial line stay buffered for the next
    /// call.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>, BRouteError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let raw = self.buf.split_to(pos + 1);
                let mut line = raw.to_vec();
                while matches!(line.last(), Some(b'\r') | Some(b'\n')) {
                    line.pop();
                }
                return Ok(Some(line));
            }

            let mut chunk = [0u8; 256];
            match tokio::time::timeout(self.read_timeout, self.port.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(BRouteError::SerialPortError(e.to_string())),
            }
        }
    }

    /// Discards any buffered partial input.
    pub fn clear_buffer(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wisun::serial_mock::MockSerialPort;

    fn transport(mock: &MockSerialPort) -> LineTransport<MockSerialPort> {
        LineTransport::new(mock.clone(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_read_line_strips_crlf() {
        let mock = MockSerialPort::new();
        mock.queue_line("OK");
        let mut t = transport(&mock);
        assert_eq!(t.read_line().await.unwrap(), Some(b"OK".to_vec()));
    }

    #[tokio::test]
    async fn test_read_line_timeout_returns_none() {
        let mock = MockSerialPort::new();
        let mut t = transport(&mock);
        assert_eq!(t.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_line_splits_multiple_lines() {
        let mock = MockSerialPort::new();
        mock.queue_rx_data(b"EVENT 20 FE80\r\nOK\r\n");
        let mut t = transport(&mock);
        assert_eq!(t.read_line().await.unwrap(), Some(b"EVENT 20 FE80".to_vec()));
        assert_eq!(t.read_line().await.unwrap(), Some(b"OK".to_vec()));
    }

    #[tokio::test]
    async fn test_partial_line_stays_buffered() {
        let mock = MockSerialPort::new();
        mock.queue_rx_data(b"EVE");
        let mut t = transport(&mock);
        assert_eq!(t.read_line().await.unwrap(), None);
        mock.queue_rx_data(b"NT 22 FE80\r\n");
        assert_eq!(t.read_line().await.unwrap(), Some(b"EVENT 22 FE80".to_vec()));
    }

    #[tokio::test]
    async fn test_write_line_appends_crlf() {
        let mock = MockSerialPort::new();
        let mut t = transport(&mock);
        t.write_line("SKRESET").await.unwrap();
        assert_eq!(mock.get_tx_data(), b"SKRESET\r\n");
    }
}
