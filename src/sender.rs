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

use std::marker::PhantomData;
use log::{debug, info, warn};
use crate::config::SessionConfig;
use crate::packet::{Mode, Packet};
use crate::protocol::*;
use crate::serial::SerialPort;
use crate::status::{Status, Step, TransferError, TransferStats};
use crate::storage::BlockSource;

// ============================================================================
// States
// ============================================================================

/// Waiting for the receiver to ask for CRC or checksum mode
pub struct AwaitHandshake;
/// Moving packets, one in flight at a time
pub struct Sending;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    source: Box<dyn BlockSource>,
    config: SessionConfig,
    mode: Mode,
    status: Status,
    // Blocks framed so far plus one; the wire carries it modulo 256
    sequence: u32,
    in_flight: Option<InFlight>,
    retries: u32,
    flushed: bool,
    stats: TransferStats,
}

struct InFlight {
    packet: Packet,
    data_len: usize,
}

impl InFlight {
    fn is_eot(&self) -> bool {
        self.packet.header() == EOT
    }
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Step<dyn SenderState>, TransferError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            serial: self.serial,
            source: self.source,
            config: self.config,
            mode: self.mode,
            status: self.status,
            sequence: self.sequence,
            in_flight: self.in_flight,
            retries: self.retries,
            flushed: self.flushed,
            stats: self.stats,
        })
    }

    fn io_error(&self, e: std::io::Error) -> TransferError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        TransferError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn flush(&mut self) -> Result<(), TransferError> {
        self.serial.flush().map_err(|e| self.io_error(e))
    }

    fn read_response(&mut self, timeout: std::time::Duration) -> Result<Option<u8>, TransferError> {
        let response = self.serial.read_byte(timeout).map_err(|e| self.io_error(e))?;
        match response {
            Some(byte) => debug!("Received: {}", name(byte)),
            None => debug!("No response"),
        }
        Ok(response)
    }

    /// A CAN arrived; only a second CAN right behind it is a cancel
    fn confirm_cancel(&mut self) -> Result<bool, TransferError> {
        let timeout = self.config.char_timeout;
        let next = self.serial.read_byte(timeout).map_err(|e| self.io_error(e))?;
        if next != Some(CAN) {
            debug!("Lone CAN, treating as line noise");
        }
        Ok(next == Some(CAN))
    }

    fn cancelled(&self) -> TransferError {
        warn!("Transfer cancelled by receiver");
        TransferError::Cancelled
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<AwaitHandshake> {
    fn step(self: Box<Self>) -> Result<Step<dyn SenderState>, TransferError> {
        let mut fsm = *self;

        if !fsm.flushed {
            fsm.flush()?;
            fsm.flushed = true;
        }

        let timeout = fsm.config.handshake_timeout;
        match fsm.read_response(timeout)? {
            Some(CRC_REQUEST) => {
                fsm.mode = Mode::Crc16;
            }
            Some(NAK) => {
                fsm.mode = Mode::Checksum;
            }
            Some(CAN) if fsm.confirm_cancel()? => {
                return Err(fsm.cancelled());
            }
            other => {
                fsm.status = if other.is_some() { Status::Error } else { Status::Timeout };
                fsm.retries = fsm.retries.saturating_sub(1);
                if fsm.retries == 0 {
                    warn!("Receiver never asked for a transfer");
                    return Err(TransferError::Timeout);
                }
                debug!("Waiting for receiver ({} attempts left)", fsm.retries);
                return Ok(Step::Next(Box::new(fsm) as Box<dyn SenderState>));
            }
        }

        info!("Receiver requested {:?} mode", fsm.mode);
        fsm.status = Status::Ok;
        fsm.retries = fsm.config.max_retries;
        let next = fsm.transition::<Sending>();
        Ok(Step::Next(next as Box<dyn SenderState>))
    }
}

impl SenderState for SenderFsm<Sending> {
    fn step(self: Box<Self>) -> Result<Step<dyn SenderState>, TransferError> {
        let mut fsm = *self;

        if fsm.in_flight.is_none() {
            let mut buf = [0u8; LONG_PAYLOAD];
            let first = fsm.sequence < 2;
            let data_len = match fsm.source.read_block(&mut buf, first) {
                Ok(count) => count.min(LONG_PAYLOAD),
                Err(e) => {
                    warn!("Storage failed to supply block {}: {}", fsm.sequence, e);
                    fsm.serial.write_all(&ABORT_SEQUENCE).map_err(|e| fsm.io_error(e))?;
                    return Err(TransferError::Storage(e));
                }
            };

            let packet = if data_len == 0 {
                Packet::eot()
            } else {
                Packet::data(fsm.sequence as u8, &buf[..data_len], fsm.mode)
            };
            fsm.in_flight = Some(InFlight { packet, data_len });
            fsm.retries = fsm.config.max_retries;
        }

        let Some(in_flight) = fsm.in_flight.take() else {
            return Ok(Step::Next(Box::new(fsm) as Box<dyn SenderState>));
        };

        fsm.flush()?;
        fsm.serial.write_all(in_flight.packet.as_bytes()).map_err(|e| fsm.io_error(e))?;
        debug!("Sent: {} block {} ({} bytes)", name(in_flight.packet.header()), fsm.sequence as u8, in_flight.data_len);

        let timeout = fsm.config.char_timeout;
        match fsm.read_response(timeout)? {
            Some(ACK) if in_flight.is_eot() => {
                fsm.status = Status::EndOfTransfer;
                info!("Transfer complete: {} blocks, {} bytes", fsm.stats.blocks, fsm.stats.bytes);
                return Ok(Step::Done(fsm.stats));
            }
            Some(ACK) => {
                fsm.status = Status::Ok;
                fsm.stats.blocks += 1;
                fsm.stats.bytes += in_flight.data_len as u64;
                fsm.sequence += 1;
                return Ok(Step::Next(Box::new(fsm) as Box<dyn SenderState>));
            }
            Some(CAN) if fsm.confirm_cancel()? => {
                return Err(fsm.cancelled());
            }
            Some(NAK) => fsm.status = Status::CrcError,
            Some(_) => fsm.status = Status::Error,
            None => fsm.status = Status::Timeout,
        }

        fsm.retries = fsm.retries.saturating_sub(1);
        if fsm.retries == 0 {
            warn!("Giving up on block {} after repeated {}", fsm.sequence as u8, fsm.status);
            return Err(if in_flight.is_eot() && fsm.status != Status::Timeout {
                TransferError::Protocol(fsm.status)
            } else {
                TransferError::Timeout
            });
        }

        debug!("Retransmitting after {} ({} left)", fsm.status, fsm.retries);
        fsm.in_flight = Some(in_flight);
        Ok(Step::Next(Box::new(fsm) as Box<dyn SenderState>))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<AwaitHandshake> {
    pub fn new(serial: Box<dyn SerialPort>, source: Box<dyn BlockSource>, config: SessionConfig) -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<AwaitHandshake>,
            serial,
            source,
            mode: config.mode,
            retries: config.max_retries,
            config,
            status: Status::Timeout,
            sequence: 1,
            in_flight: None,
            flushed: false,
            stats: TransferStats::default(),
        })
    }
}

/// Send everything `source` supplies; succeeds once the receiver acknowledged EOT
pub fn send(serial: Box<dyn SerialPort>, source: Box<dyn BlockSource>, config: SessionConfig) -> Result<TransferStats, TransferError> {
    let mut state = SenderFsm::new(serial, source, config);

    loop {
        match state.step()? {
            Step::Next(next) => state = next,
            Step::Done(stats) => return Ok(stats),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::checksum;
    use crate::serial::MockSerialPort;
    use crate::storage::{FileSource, MemorySource};

    fn config(max_retries: u32) -> SessionConfig {
        SessionConfig { max_retries, ..SessionConfig::immediate() }
    }

    #[test]
    fn test_sender_two_packets_with_retransmit() {
        let data: Vec<u8> = (0..1500u32).map(|i| (i % 256) as u8).collect();

        let responses = vec![
            Some(CRC_REQUEST),
            Some(ACK),
            Some(NAK),
            Some(ACK),
            Some(ACK),
        ];

        let first = Packet::data(1, &data[..1024], Mode::Crc16);
        let second = Packet::data(2, &data[1024..], Mode::Crc16);
        assert_eq!(second.header(), STX);

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(first.as_bytes());
        expected_writes.extend_from_slice(second.as_bytes());
        expected_writes.extend_from_slice(second.as_bytes());
        expected_writes.push(EOT);

        let source = MemorySource::new(&data, 1024);
        let requests = source.requests();
        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));

        let stats = send(mock_serial, Box::new(source), config(10)).expect("Transfer failed");

        assert_eq!(stats, TransferStats { blocks: 2, bytes: 1500 });
        assert_eq!(*requests.lock().unwrap(), vec![true, false, false]);
    }

    #[test]
    fn test_sender_checksum_mode_short_packet() {
        let responses = vec![Some(NAK), Some(ACK), Some(ACK)];

        let mut block = b"Test data".to_vec();
        block.resize(128, FILL);

        let mut expected_writes = vec![SOH, 0x01, 0xFE];
        expected_writes.extend_from_slice(&block);
        expected_writes.push(checksum(&block));
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let source = MemorySource::new(b"Test data", 1024);

        let stats = send(mock_serial, Box::new(source), config(10)).expect("Transfer failed");
        assert_eq!(stats, TransferStats { blocks: 1, bytes: 9 });
    }

    #[test]
    fn test_sender_file_source() {
        let test_file = std::env::temp_dir().join("ymodem_sender_test.txt");
        let content: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&test_file, &content).unwrap();

        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(Packet::data(1, &content, Mode::Crc16).as_bytes());
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let source = FileSource::open(&test_file).expect("Should open file");

        let stats = send(mock_serial, Box::new(source), config(10)).expect("Transfer failed");
        assert_eq!(stats.bytes, 300);

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_sender_handshake_retry() {
        let responses = vec![None, Some(b'x'), Some(CRC_REQUEST)];

        let mock_serial = Box::new(MockSerialPort::new(responses, vec![]));
        let mut fsm = SenderFsm::new(mock_serial, Box::new(MemorySource::new(&[], 1024)), config(10));

        for _ in 0..3 {
            fsm = match fsm.step().expect("Should succeed") {
                Step::Next(next) => next,
                Step::Done(_) => panic!("Transfer finished early"),
            };
        }
    }

    #[test]
    fn test_sender_handshake_timeout() {
        let responses = vec![None, None, None];

        let mock_serial = Box::new(MockSerialPort::new(responses, vec![]));
        let result = send(mock_serial, Box::new(MemorySource::new(b"never sent", 1024)), config(3));

        assert!(matches!(result, Err(TransferError::Timeout)));
    }

    #[test]
    fn test_sender_gives_up_on_block() {
        let responses = vec![Some(CRC_REQUEST), None, Some(NAK)];

        let packet = Packet::data(1, b"unlucky", Mode::Crc16);
        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(packet.as_bytes());
        expected_writes.extend_from_slice(packet.as_bytes());

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let result = send(mock_serial, Box::new(MemorySource::new(b"unlucky", 1024)), config(2));

        assert!(matches!(result, Err(TransferError::Timeout)));
    }

    #[test]
    fn test_sender_cancelled_by_receiver() {
        let responses = vec![Some(CRC_REQUEST), Some(CAN), Some(CAN)];

        let packet = Packet::data(1, b"stop", Mode::Crc16);
        let expected_writes = packet.as_bytes().to_vec();

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let result = send(mock_serial, Box::new(MemorySource::new(b"stop", 1024)), config(10));

        assert!(matches!(result, Err(TransferError::Cancelled)));
    }

    #[test]
    fn test_sender_empty_source() {
        let responses = vec![Some(CRC_REQUEST), Some(ACK)];
        let expected_writes = vec![EOT];

        let source = MemorySource::new(&[], 1024);
        let requests = source.requests();
        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));

        let stats = send(mock_serial, Box::new(source), config(10)).expect("Transfer failed");
        assert_eq!(stats, TransferStats::default());
        assert_eq!(*requests.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_sender_storage_failure_cancels_receiver() {
        let responses = vec![Some(CRC_REQUEST)];
        let expected_writes = vec![CAN, CAN];

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let result = send(mock_serial, Box::new(MemorySource::failing()), config(10));

        assert!(matches!(result, Err(TransferError::Storage(_))));
    }

    #[test]
    fn test_sender_eot_not_acknowledged() {
        let responses = vec![Some(CRC_REQUEST), Some(NAK), Some(NAK)];
        let expected_writes = vec![EOT, EOT];

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let result = send(mock_serial, Box::new(MemorySource::new(&[], 1024)), config(2));

        match result {
            Err(TransferError::Protocol(status)) => assert_eq!(status, Status::CrcError),
            other => panic!("Expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_block_numbers_wrap() {
        let data = vec![0x33u8; 300 * 128];

        let mut responses = vec![Some(CRC_REQUEST)];
        responses.extend(std::iter::repeat(Some(ACK)).take(301));

        let mut expected_writes = Vec::new();
        for (i, chunk) in data.chunks(128).enumerate() {
            expected_writes.extend_from_slice(Packet::data((i + 1) as u8, chunk, Mode::Crc16).as_bytes());
        }
        expected_writes.push(EOT);

        let source = MemorySource::new(&data, 128);
        let requests = source.requests();
        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));

        let stats = send(mock_serial, Box::new(source), config(10)).expect("Transfer failed");
        assert_eq!(stats.blocks, 300);

        // Only the very first request is flagged, even after the wire number wraps to 0 and 1
        let requests = requests.lock().unwrap();
        assert_eq!(requests.iter().filter(|&&first| first).count(), 1);
    }

    #[test]
    fn test_sender_lone_can_retransmits() {
        let responses = vec![Some(CRC_REQUEST), Some(CAN), None, Some(ACK), Some(ACK)];

        let packet = Packet::data(1, b"x", Mode::Crc16);
        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(packet.as_bytes());
        expected_writes.extend_from_slice(packet.as_bytes());
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let stats = send(mock_serial, Box::new(MemorySource::new(b"x", 1024)), config(10)).expect("Transfer failed");
        assert_eq!(stats, TransferStats { blocks: 1, bytes: 1 });
    }

    #[test]
    fn test_sender_lone_can_during_handshake() {
        let responses = vec![Some(CAN), None, Some(CRC_REQUEST), Some(ACK)];
        let expected_writes = vec![EOT];

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let stats = send(mock_serial, Box::new(MemorySource::new(&[], 1024)), config(10)).expect("Transfer failed");
        assert_eq!(stats, TransferStats::default());
    }
}
