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

use std::time::Duration;
use crate::packet::Mode;

/// Timing and retry policy for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Receiver pause before the first start byte, lets slow senders and USB adapters come up
    pub settle_delay: Duration,
    /// Per-character read timeout
    pub char_timeout: Duration,
    /// Sender wait for the receiver's start byte, per attempt
    pub handshake_timeout: Duration,
    /// Receiver pause before each packet read
    pub poll_delay: Duration,
    /// Attempts per packet before the session is abandoned
    pub max_retries: u32,
    /// Verification the receiver asks for first
    pub mode: Mode,
    /// Receiver strips CP/M EOF padding from each payload
    pub text_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            settle_delay: Duration::from_secs(20),
            char_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
            poll_delay: Duration::from_millis(10),
            max_retries: 10,
            mode: Mode::Crc16,
            text_mode: false,
        }
    }
}

impl SessionConfig {
    /// No delays at all, for driving the state machines from scripted input
    #[cfg(test)]
    pub fn immediate() -> Self {
        SessionConfig {
            settle_delay: Duration::ZERO,
            poll_delay: Duration::ZERO,
            ..SessionConfig::default()
        }
    }

    pub(crate) fn pause(delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
