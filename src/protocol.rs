// Copyright (C) 2026 Echolink Authors
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

//! ECHOLINK wire format constants
//!
//! A transfer is a sequence of text lines, each `<crc-decimal>,<payload>\n`,
//! closed by a sentinel line whose payload is `END`. The receiver answers the
//! sentinel with its full store contents followed by a literal `END\n`.

/// Line feed - terminates every wire line
pub const LF: u8 = b'\n';

/// Comma - separates the decimal CRC field from the payload bytes
pub const FIELD_SEPARATOR: u8 = b',';

/// Sentinel payload - a chunk carrying exactly these bytes ends the transfer
pub const SENTINEL: &[u8] = b"END";

/// Trailer emitted after the store dump on readback
pub const READBACK_TRAILER: &[u8] = b"END\n";

/// Size of the receiver's line accumulation buffer
pub const LINE_BUFFER_SIZE: usize = 256;

/// Default capacity of the receiver's circular store
pub const DEFAULT_STORE_CAPACITY: usize = 256;

/// Default number of payload bytes per chunk
pub const DEFAULT_CHUNK_LEN: usize = 32;
