//! Mock serial port implementation for testing
//!
//! Simulates the dongle end of the SK line protocol without hardware: tests
//! queue response lines, run a driver operation, and inspect the command
//! bytes it wrote.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::BRouteError;
use crate::wisun::serial::{OpenAsync, SerialPort, SerialSettings};

/// Mock serial port that simulates bidirectional communication.
#[derive(Clone, Default)]
pub struct MockSerialPort {
    /// Data written to the port (outgoing).
    tx_buffer: Arc<Mutex<Vec<u8>>>,
    /// Data to be read from the port (incoming).
    rx_buffer: Arc<Mutex<VecDeque<u8>>>,
    /// Simulated error returned by the next read or write.
    next_error: Arc<Mutex<Option<io::Error>>>,
    /// Waker of a reader parked on an empty buffer.
    read_waker: Arc<Mutex<Option<Waker>>>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes to be read from the port.
    pub fn queue_rx_data(&self, data: &[u8]) {
        self.rx_buffer.lock().unwrap().extend(data);
        if let Some(waker) = self.read_waker.lock().unwrap().take() {
            waker.wake();
        }
    }

    /// Queue one response line, CR+LF terminated.
    pub fn queue_line(&self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.queue_rx_data(&data);
    }

    /// Get all bytes that were written to the port.
    pub fn get_tx_data(&self) -> Vec<u8> {
        self.tx_buffer.lock().unwrap().clone()
    }

    /// Written bytes split into lines, lossily decoded. Binary payloads show
    /// up inside whichever line they were appended to.
    pub fn tx_lines(&self) -> Vec<String> {
        let data = self.get_tx_data();
        String::from_utf8_lossy(&data)
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect()
    }

    /// Clear both buffers.
    pub fn clear(&self) {
        self.tx_buffer.lock().unwrap().clear();
        self.rx_buffer.lock().unwrap().clear();
    }

    /// Set an error to be returned by the next read or write.
    pub fn set_next_error(&self, error: io::Error) {
        *self.next_error.lock().unwrap() = Some(error);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Poll::Ready(Err(error));
        }

        let mut rx = self.rx_buffer.lock().unwrap();
        let available = rx.len().min(buf.remaining());
        if available == 0 {
            // Park until data is queued; the caller's read timeout still
            // bounds the wait.
            *self.read_waker.lock().unwrap() = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let data: Vec<u8> = rx.drain(..available).collect();
        buf.put_slice(&data);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Poll::Ready(Err(error));
        }
        self.tx_buffer.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl SerialPort for MockSerialPort {
    async fn flush_port(&mut self) -> Result<(), std::io::Error> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl OpenAsync for MockSerialPort {
    async fn open_port(_settings: &SerialSettings) -> Result<Self, BRouteError> {
        Ok(MockSerialPort::new())
    }
}
