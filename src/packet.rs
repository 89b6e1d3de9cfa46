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

//! Packet framing and verification
//!
//! A data packet on the wire is
//!
//! ```text
//! SOH|STX  block  !block  payload[128|1024]  checksum[1] | crc16[2, big endian]
//! ```
//!
//! The verification field covers the payload only.

use crc::{Crc, CRC_16_XMODEM};
use crate::protocol::*;
use crate::status::Status;

const XMODEM_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

// ============================================================================
// Verification Mode
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 8-bit additive checksum
    Checksum,
    /// CRC-16/XMODEM
    Crc16,
}

impl Mode {
    /// Number of verification bytes following the payload
    pub fn trailer_len(self) -> usize {
        match self {
            Mode::Checksum => 1,
            Mode::Crc16 => 2,
        }
    }

    /// Byte a receiver sends to ask for a transfer in this mode
    pub fn start_byte(self) -> u8 {
        match self {
            Mode::Checksum => NAK,
            Mode::Crc16 => CRC_REQUEST,
        }
    }
}

// ============================================================================
// Checksums
// ============================================================================

/// Payload size announced by a header byte, 0 for anything but SOH or STX
pub fn payload_size(header: u8) -> usize {
    match header {
        SOH => SHORT_PAYLOAD,
        STX => LONG_PAYLOAD,
        _ => 0,
    }
}

/// CRC-16/XMODEM of `bytes`, continuing from `seed` (0 for a fresh packet)
pub fn crc16(bytes: &[u8], seed: u16) -> u16 {
    let mut digest = XMODEM_CRC.digest_with_initial(seed);
    digest.update(bytes);
    digest.finalize()
}

/// Sum of all bytes modulo 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Drop a trailing run of fill bytes.
///
/// A fill byte followed by anything else is data and stays. A payload made of
/// nothing but fill bytes trims to empty.
pub fn trim_padding(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != FILL)
        .map_or(0, |idx| idx + 1);
    &payload[..end]
}

// ============================================================================
// Packet
// ============================================================================

/// One packet as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    frame: Vec<u8>,
}

impl Packet {
    /// Frame `data` as block `block`. Up to 128 bytes go out as SOH, anything
    /// longer as STX; the remainder of the payload is filled with 0x1A.
    pub fn data(block: u8, data: &[u8], mode: Mode) -> Packet {
        debug_assert!(data.len() <= LONG_PAYLOAD, "payload of {} bytes", data.len());

        let (header, size) = if data.len() <= SHORT_PAYLOAD {
            (SOH, SHORT_PAYLOAD)
        } else {
            (STX, LONG_PAYLOAD)
        };

        let mut frame = Vec::with_capacity(PACKET_OVERHEAD + size + mode.trailer_len());
        frame.push(header);
        frame.push(block);
        frame.push(!block);
        frame.extend_from_slice(data);
        frame.resize(PACKET_OVERHEAD + size, FILL);

        let payload = &frame[PACKET_OVERHEAD..];
        match mode {
            Mode::Crc16 => {
                let crc = crc16(payload, 0);
                frame.extend_from_slice(&crc.to_be_bytes());
            }
            Mode::Checksum => {
                let sum = checksum(payload);
                frame.push(sum);
            }
        }

        Packet { frame }
    }

    /// The end-of-transmission packet, a bare header
    pub fn eot() -> Packet {
        Packet { frame: vec![EOT] }
    }

    /// Wrap bytes read off the wire
    pub fn from_frame(frame: Vec<u8>) -> Packet {
        Packet { frame }
    }

    pub fn header(&self) -> u8 {
        self.frame.first().copied().unwrap_or(0)
    }

    pub fn block(&self) -> u8 {
        self.frame.get(1).copied().unwrap_or(0)
    }

    pub fn payload(&self) -> &[u8] {
        let size = payload_size(self.header());
        self.frame.get(PACKET_OVERHEAD..PACKET_OVERHEAD + size).unwrap_or(&[])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }

    /// Check the block complement and the verification field.
    ///
    /// Returns `Status::Error` for a frame that is not a complete data packet
    /// in `mode`, `Status::CrcError` for any mismatch, never panics.
    pub fn verify(&self, mode: Mode) -> Status {
        let size = payload_size(self.header());
        if size == 0 || self.frame.len() != PACKET_OVERHEAD + size + mode.trailer_len() {
            return Status::Error;
        }

        if self.frame[2] != !self.frame[1] {
            return Status::CrcError;
        }

        let payload = self.payload();
        let trailer = &self.frame[PACKET_OVERHEAD + size..];
        let matches = match mode {
            Mode::Crc16 => crc16(payload, 0).to_be_bytes() == trailer,
            Mode::Checksum => [checksum(payload)] == trailer,
        };

        if matches { Status::Ok } else { Status::CrcError }
    }
}

// ============================================================================
// Tests
// ============================================================================
