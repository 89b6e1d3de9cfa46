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

//! XMODEM/YMODEM protocol constants

/// Start of header - begins a packet with a 128-byte payload
pub const SOH: u8 = 0x01;

/// Start of text - begins a packet with a 1024-byte payload
pub const STX: u8 = 0x02;

/// End of transmission - sender has no more data
pub const EOT: u8 = 0x04;

/// Acknowledge - receiver accepted the packet
pub const ACK: u8 = 0x06;

/// Negative acknowledge - receiver wants the packet again, or requests checksum mode
pub const NAK: u8 = 0x15;

/// Cancel - two in succession abort the transfer
pub const CAN: u8 = 0x18;

/// 'C' - receiver requests CRC-16 mode, sent in place of the first NAK
pub const CRC_REQUEST: u8 = b'C';

/// CP/M end of file, used to pad the last payload
pub const FILL: u8 = 0x1A;

/// Payload size of an SOH packet
pub const SHORT_PAYLOAD: usize = 128;

/// Payload size of an STX packet
pub const LONG_PAYLOAD: usize = 1024;

/// Header byte plus block number and its complement
pub const PACKET_OVERHEAD: usize = 3;

/// Written to the peer to abort a session locally
pub const ABORT_SEQUENCE: [u8; 2] = [CAN, CAN];

/// Printable name of a control byte, for log output
pub fn name(byte: u8) -> String {
    match byte {
        SOH => "SOH".to_string(),
        STX => "STX".to_string(),
        EOT => "EOT".to_string(),
        ACK => "ACK".to_string(),
        NAK => "NAK".to_string(),
        CAN => "CAN".to_string(),
        CRC_REQUEST => "'C'".to_string(),
        other => format!("0x{:02X}", other),
    }
}
