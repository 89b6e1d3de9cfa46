// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte transport the transfer engine drives.
///
/// Implementors supply `write_all`, `read_timeout` and optionally `flush`.
/// A read that sees nothing within its timeout reports `ErrorKind::TimedOut`
/// or returns 0.
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Discard anything waiting in the receive direction
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.write_all(&[byte])
    }

    /// One byte, or `None` if nothing arrived within `timeout`
    fn read_byte(&mut self, timeout: Duration) -> std::io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read_timeout(&mut buf, timeout) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fill `buf` with as many reads as it takes, each allowed `timeout`.
    /// Returns the count read before the first timeout.
    fn read_full(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_timeout(&mut buf[filled..], timeout) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        Write::write_all(&mut self.port, buf)?;
        Write::flush(&mut self.port)?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout).map_err(std::io::Error::other)?;
        Read::read(&mut self.port, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(std::io::Error::other)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

/// Replays a scripted line. Each `None` in the script is one read that times
/// out; running off the end of the script times out forever. On drop the
/// whole script must have been read and the bytes written must match.
#[cfg(test)]
pub struct MockSerialPort {
    script: Vec<Option<u8>>,
    cursor: usize,
    written: Vec<u8>,
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(script: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort { script, cursor: 0, written: Vec::new(), expected_writes }
    }

    fn timed_out() -> std::io::Error {
        std::io::Error::new(ErrorKind::TimedOut, "scripted timeout")
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.written.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        match self.script.get(self.cursor) {
            None => return Err(Self::timed_out()),
            Some(None) => {
                self.cursor += 1;
                return Err(Self::timed_out());
            }
            Some(Some(_)) => {}
        }

        let mut count = 0;
        while count < buf.len() {
            let Some(&Some(byte)) = self.script.get(self.cursor) else { break };
            buf[count] = byte;
            count += 1;
            self.cursor += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.cursor,
            self.script.len(),
            "{} scripted reads never consumed",
            self.script.len() - self.cursor
        );

        assert_eq!(
            self.written, self.expected_writes,
            "unexpected bytes on the line\nexpected {:02X?}\n     got {:02X?}",
            self.expected_writes, self.written
        );
    }
}

// ============================================================================
// In-process Link for Testing
// ============================================================================

/// One end of a two-ended in-memory line, for running a sender and a
/// receiver against each other on separate threads
#[cfg(test)]
pub struct LinkedSerialPort {
    tx: std::sync::mpsc::Sender<u8>,
    rx: std::sync::mpsc::Receiver<u8>,
    written: usize,
    corrupt_at: Option<usize>,
}

#[cfg(test)]
impl LinkedSerialPort {
    pub fn pair() -> (LinkedSerialPort, LinkedSerialPort) {
        let (a_tx, b_rx) = std::sync::mpsc::channel();
        let (b_tx, a_rx) = std::sync::mpsc::channel();
        (
            LinkedSerialPort { tx: a_tx, rx: a_rx, written: 0, corrupt_at: None },
            LinkedSerialPort { tx: b_tx, rx: b_rx, written: 0, corrupt_at: None },
        )
    }

    /// Flip every bit of the byte at this offset in the outgoing stream
    pub fn corrupt_byte(mut self, offset: usize) -> Self {
        self.corrupt_at = Some(offset);
        self
    }
}

#[cfg(test)]
impl SerialPort for LinkedSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        for &byte in buf {
            let byte = if self.corrupt_at == Some(self.written) { !byte } else { byte };
            self.written += 1;
            self.tx.send(byte)
                .map_err(|_| std::io::Error::new(ErrorKind::BrokenPipe, "peer hung up"))?;
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        buf[0] = self.rx.recv_timeout(timeout)
            .map_err(|_| std::io::Error::new(ErrorKind::TimedOut, "link timeout"))?;

        let mut bytes_read = 1;
        while bytes_read < buf.len() {
            match self.rx.try_recv() {
                Ok(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                }
                Err(_) => break,
            }
        }
        Ok(bytes_read)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_byte_maps_timeout_to_none() {
        let mut port = MockSerialPort::new(vec![None, Some(0x41)], vec![]);
        assert_eq!(port.read_byte(Duration::from_millis(1)).unwrap(), None);
        assert_eq!(port.read_byte(Duration::from_millis(1)).unwrap(), Some(0x41));
    }

    #[test]
    fn test_read_full_stops_at_timeout() {
        let mut port = MockSerialPort::new(vec![Some(1), Some(2), None], vec![]);
        let mut buf = [0u8; 4];
        let count = port.read_full(&mut buf, Duration::from_millis(1)).unwrap();
        assert_eq!(count, 2);
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn test_read_full_spans_short_reads() {
        let (mut a, mut b) = LinkedSerialPort::pair();
        a.write_all(&[1, 2, 3]).unwrap();
        a.write_byte(4).unwrap();

        let mut buf = [0u8; 4];
        let count = b.read_full(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(count, 4);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_linked_flush_discards_pending() {
        let (mut a, mut b) = LinkedSerialPort::pair();
        a.write_all(b"stale").unwrap();
        b.flush().unwrap();
        assert_eq!(b.read_byte(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_linked_corruption() {
        let (a, mut b) = LinkedSerialPort::pair();
        let mut a = a.corrupt_byte(1);
        a.write_all(&[0x00, 0x00, 0x00]).unwrap();

        let mut buf = [0u8; 3];
        b.read_full(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(buf, [0x00, 0xFF, 0x00]);
    }
}
