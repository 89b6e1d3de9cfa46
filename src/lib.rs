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

//! XMODEM/YMODEM transfer engine
//!
//! Stop-and-wait packet transfer over a byte transport. The host supplies the
//! transport ([`serial::SerialPort`]) and the storage ([`storage::BlockSource`]
//! for sending, [`storage::BlockSink`] for receiving); one call to
//! [`receive`] or [`send`] runs one session to completion.

pub mod config;
pub mod packet;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod serial;
pub mod status;
pub mod storage;

pub use config::SessionConfig;
pub use packet::Mode;
pub use receiver::receive;
pub use sender::send;
pub use status::{Status, TransferError, TransferStats};
