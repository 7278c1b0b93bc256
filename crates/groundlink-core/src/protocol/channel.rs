//! Byte channel abstraction
//!
//! A [`Channel`] is a byte-oriented duplex link with non-blocking read
//! polling. The real implementation wraps a serial port; the bench simulator
//! implements the same trait for tests and demo mode.

use serialport::SerialPort;
use std::io;
use std::io::{Read, Write};

/// A byte-oriented duplex link.
///
/// Reads must never block indefinitely: callers poll [`bytes_to_read`]
/// and bound the whole exchange with their own deadline.
///
/// [`bytes_to_read`]: Channel::bytes_to_read
pub trait Channel: Send {
    /// Write all bytes, transmitting the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Read up to `buf.len()` available bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Number of received bytes waiting to be read.
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Discard any pending input and output.
    fn clear_buffers(&mut self) -> io::Result<()>;
}

/// Serial port implementation of [`Channel`].
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an already-opened serial port.
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Channel for SerialChannel {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
