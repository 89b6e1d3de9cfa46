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

use thiserror::Error;

// ============================================================================
// Protocol Outcome
// ============================================================================

/// Outcome of the last protocol exchange. Drives the next action of either
/// state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Timeout,
    EndOfTransfer,
    Cancel,
    /// Unrecognised header byte
    Error,
    /// Checksum, CRC or block complement mismatch
    CrcError,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Status::Ok => "ok",
            Status::Timeout => "timeout",
            Status::EndOfTransfer => "end of transfer",
            Status::Cancel => "cancel",
            Status::Error => "framing error",
            Status::CrcError => "verification error",
        };
        f.write_str(text)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("timed out after exhausting the retry budget")]
    Timeout,

    #[error("transfer cancelled by peer")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[source] std::io::Error),

    #[error("transfer ended with {0}")]
    Protocol(Status),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// The protocol outcome this error terminated the session with
    pub fn status(&self) -> Status {
        match self {
            TransferError::Timeout => Status::Timeout,
            TransferError::Cancelled => Status::Cancel,
            TransferError::Protocol(status) => *status,
            TransferError::Storage(_) | TransferError::Io(_) => Status::Error,
        }
    }
}

// ============================================================================
// FSM Step Result
// ============================================================================

/// What one step of a state machine produced
pub enum Step<S: ?Sized> {
    /// Keep stepping from this state
    Next(Box<S>),
    /// Session finished successfully
    Done(TransferStats),
}

// ============================================================================
// Statistics
// ============================================================================

/// What a completed session moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Packets acknowledged (sender) or handed to the sink (receiver)
    pub blocks: u32,
    /// Payload bytes read from the source or handed to the sink
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_maps_to_status() {
        assert_eq!(TransferError::Timeout.status(), Status::Timeout);
        assert_eq!(TransferError::Cancelled.status(), Status::Cancel);
        assert_eq!(TransferError::Protocol(Status::CrcError).status(), Status::CrcError);

        let storage = TransferError::Storage(std::io::Error::other("disk full"));
        assert_eq!(storage.status(), Status::Error);
        assert_eq!(storage.to_string(), "storage error: disk full");
    }
}
