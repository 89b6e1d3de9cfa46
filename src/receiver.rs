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
use crate::packet::{Mode, Packet, payload_size, trim_padding};
use crate::protocol::*;
use crate::serial::SerialPort;
use crate::status::{Status, Step, TransferError, TransferStats};
use crate::storage::BlockSink;

// ============================================================================
// States
// ============================================================================

/// No packet verified yet, the start byte is repeated on every timeout
pub struct AwaitStart;
/// At least one packet verified
pub struct Receiving;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    sink: Box<dyn BlockSink>,
    config: SessionConfig,
    mode: Mode,
    status: Status,
    retries: u32,
    settled: bool,
    last_block: Option<u8>,
    stats: TransferStats,
}

/// What arrived where a packet was expected
enum Incoming {
    Packet(Packet),
    EndOfTransfer,
    Cancel,
    Timeout,
    Garbage(u8),
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Step<dyn ReceiverState>, TransferError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            serial: self.serial,
            sink: self.sink,
            config: self.config,
            mode: self.mode,
            status: self.status,
            retries: self.retries,
            settled: self.settled,
            last_block: self.last_block,
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

    fn send(&mut self, byte: u8) -> Result<(), TransferError> {
        self.serial.write_byte(byte).map_err(|e| self.io_error(e))?;
        debug!("Sent: {}", name(byte));
        Ok(())
    }

    fn abort(&mut self) -> Result<(), TransferError> {
        warn!("Aborting transfer");
        self.serial.write_all(&ABORT_SEQUENCE).map_err(|e| self.io_error(e))
    }

    fn read_packet(&mut self) -> Result<Incoming, TransferError> {
        let timeout = self.config.char_timeout;

        let header = match self.serial.read_byte(timeout).map_err(|e| self.io_error(e))? {
            Some(byte) => byte,
            None => return Ok(Incoming::Timeout),
        };

        match header {
            EOT => return Ok(Incoming::EndOfTransfer),
            CAN => {
                // Lone CAN followed by silence also ends the session
                return match self.serial.read_byte(timeout).map_err(|e| self.io_error(e))? {
                    Some(CAN) | None => Ok(Incoming::Cancel),
                    Some(_) => {
                        self.drain()?;
                        Ok(Incoming::Garbage(CAN))
                    }
                };
            }
            _ => {}
        }

        let size = payload_size(header);
        if size == 0 {
            self.drain()?;
            return Ok(Incoming::Garbage(header));
        }

        let mut frame = vec![0u8; PACKET_OVERHEAD + size + self.mode.trailer_len()];
        frame[0] = header;
        let expected = frame.len() - 1;
        let read = self.serial.read_full(&mut frame[1..], timeout).map_err(|e| self.io_error(e))?;
        if read < expected {
            debug!("Short packet: {} of {} bytes", read, expected);
            return Ok(Incoming::Timeout);
        }

        debug!("Received: {} block {}", name(header), frame[1]);
        Ok(Incoming::Packet(Packet::from_frame(frame)))
    }

    /// Discard whatever is left of a damaged packet, until the line goes quiet
    fn drain(&mut self) -> Result<(), TransferError> {
        let timeout = self.config.char_timeout;
        let mut discarded = 0usize;
        while self.serial.read_byte(timeout).map_err(|e| self.io_error(e))?.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} bytes of line noise", discarded);
        }
        Ok(())
    }

    /// Spend one retry on a failed attempt and ask for the packet again
    fn reject(&mut self, status: Status) -> Result<(), TransferError> {
        self.status = status;
        self.retries = self.retries.saturating_sub(1);
        if self.retries == 0 {
            warn!("Giving up after repeated {}", status);
            return Err(match status {
                Status::Timeout => TransferError::Timeout,
                other => TransferError::Protocol(other),
            });
        }

        debug!("Retry after {} ({} left)", status, self.retries);
        self.send(NAK)
    }

    /// Verify a packet and hand it to the sink. Returns whether it was accepted.
    fn accept(&mut self, packet: Packet) -> Result<bool, TransferError> {
        let status = packet.verify(self.mode);
        if status != Status::Ok {
            debug!("Block {} failed verification: {}", packet.block(), status);
            self.reject(status)?;
            return Ok(false);
        }

        self.status = Status::Ok;
        self.retries = self.config.max_retries;

        let block = packet.block();
        if self.last_block == Some(block) {
            debug!("Block {} repeated, already stored", block);
            self.send(ACK)?;
            return Ok(true);
        }
        self.last_block = Some(block);

        let data = if self.config.text_mode {
            trim_padding(packet.payload())
        } else {
            packet.payload()
        };

        if !data.is_empty() {
            if let Err(e) = self.sink.write_block(block, data) {
                warn!("Storage rejected block {}: {}", block, e);
                self.abort()?;
                return Err(TransferError::Storage(e));
            }
            self.stats.blocks += 1;
            self.stats.bytes += data.len() as u64;
        }

        self.send(ACK)?;
        Ok(true)
    }

    fn end_of_transfer(mut self) -> Result<Step<dyn ReceiverState>, TransferError> {
        debug!("Received: EOT");
        self.status = Status::EndOfTransfer;

        if let Err(e) = self.sink.finish() {
            warn!("Storage failed to finish: {}", e);
            self.abort()?;
            return Err(TransferError::Storage(e));
        }

        self.send(ACK)?;
        info!("Transfer complete: {} blocks, {} bytes", self.stats.blocks, self.stats.bytes);
        Ok(Step::Done(self.stats))
    }

    fn cancelled(&self) -> TransferError {
        warn!("Transfer cancelled by sender");
        TransferError::Cancelled
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<AwaitStart> {
    fn step(self: Box<Self>) -> Result<Step<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;

        if !fsm.settled {
            SessionConfig::pause(fsm.config.settle_delay);
            fsm.settled = true;
        }

        if fsm.status == Status::Timeout {
            let start = fsm.mode.start_byte();
            fsm.send(start)?;
        }

        SessionConfig::pause(fsm.config.poll_delay);
        match fsm.read_packet()? {
            Incoming::Timeout => {
                fsm.status = Status::Timeout;
                fsm.retries = fsm.retries.saturating_sub(1);
                if fsm.retries == 0 {
                    if fsm.mode == Mode::Crc16 {
                        info!("No answer to CRC request, falling back to checksum mode");
                        fsm.mode = Mode::Checksum;
                        fsm.retries = fsm.config.max_retries;
                    } else {
                        warn!("Sender never started");
                        return Err(TransferError::Timeout);
                    }
                }
                Ok(Step::Next(Box::new(fsm) as Box<dyn ReceiverState>))
            }
            Incoming::Packet(packet) => {
                if fsm.accept(packet)? {
                    info!("Transfer started in {:?} mode", fsm.mode);
                    let next = fsm.transition::<Receiving>();
                    Ok(Step::Next(next as Box<dyn ReceiverState>))
                } else {
                    Ok(Step::Next(Box::new(fsm) as Box<dyn ReceiverState>))
                }
            }
            Incoming::Garbage(byte) => {
                debug!("Unexpected header {}", name(byte));
                fsm.reject(Status::Error)?;
                Ok(Step::Next(Box::new(fsm) as Box<dyn ReceiverState>))
            }
            Incoming::EndOfTransfer => fsm.end_of_transfer(),
            Incoming::Cancel => Err(fsm.cancelled()),
        }
    }
}

impl ReceiverState for ReceiverFsm<Receiving> {
    fn step(self: Box<Self>) -> Result<Step<dyn ReceiverState>, TransferError> {
        let mut fsm = *self;

        SessionConfig::pause(fsm.config.poll_delay);
        match fsm.read_packet()? {
            Incoming::Timeout => {
                fsm.reject(Status::Timeout)?;
            }
            Incoming::Packet(packet) => {
                fsm.accept(packet)?;
            }
            Incoming::Garbage(byte) => {
                debug!("Unexpected header {}", name(byte));
                fsm.reject(Status::Error)?;
            }
            Incoming::EndOfTransfer => return fsm.end_of_transfer(),
            Incoming::Cancel => return Err(fsm.cancelled()),
        }

        Ok(Step::Next(Box::new(fsm) as Box<dyn ReceiverState>))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<AwaitStart> {
    pub fn new(serial: Box<dyn SerialPort>, sink: Box<dyn BlockSink>, config: SessionConfig) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<AwaitStart>,
            serial,
            sink,
            mode: config.mode,
            retries: config.max_retries,
            config,
            status: Status::Timeout,
            settled: false,
            last_block: None,
            stats: TransferStats::default(),
        })
    }
}

/// Receive one transfer, handing every verified block to `sink` as it arrives
pub fn receive(serial: Box<dyn SerialPort>, sink: Box<dyn BlockSink>, config: SessionConfig) -> Result<TransferStats, TransferError> {
    let mut state = ReceiverFsm::new(serial, sink, config);

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
