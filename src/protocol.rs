// Copyright (C) 2026 The z80-loader developers
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

//! ATMega-Z80 link protocol constants and frame codec

use std::fmt;

/// Largest program the board accepts (the top page is reserved)
pub const MAX_PROGRAM_SIZE: usize = 0x10000 - 256;

/// Maximum number of program bytes framed into one block
pub const BLOCK_SIZE: usize = 256;

/// Size of the RAM working buffer reachable by upload and readback
pub const RAM_BUFFER_SIZE: usize = 16;

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Load a program from the serial link into Z80 memory and run it
    LoadBinary = 1,

    /// Echo one byte back to the host
    Echo = 2,

    /// Upload up to 16 bytes into the RAM working buffer
    UploadToRam = 3,

    /// Read back the first 16 bytes of RAM
    ReadRamFirst16 = 4,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// Response codes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0,
    Timeout = 1,
    InvalidSize = 2,
    ChecksumFailed = 3,
    UnknownCommand = 4,
    UsartFrameError = 5,
    UsartBufferOverflow = 6,
}

impl ResponseCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ResponseCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseCode::Ok),
            1 => Ok(ResponseCode::Timeout),
            2 => Ok(ResponseCode::InvalidSize),
            3 => Ok(ResponseCode::ChecksumFailed),
            4 => Ok(ResponseCode::UnknownCommand),
            5 => Ok(ResponseCode::UsartFrameError),
            6 => Ok(ResponseCode::UsartBufferOverflow),
            other => Err(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseCode::Ok => "OK",
            ResponseCode::Timeout => "TIMEOUT",
            ResponseCode::InvalidSize => "INVALID_SIZE",
            ResponseCode::ChecksumFailed => "CHECKSUM_FAILED",
            ResponseCode::UnknownCommand => "UNKNOWN_COMMAND",
            ResponseCode::UsartFrameError => "USART_FRAME_ERROR",
            ResponseCode::UsartBufferOverflow => "USART_BUFFER_OVERFLOW",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

// ============================================================================
// Frame codec
// ============================================================================

/// Program length as sent after LOAD_BINARY, big-endian
pub fn encode_length(length: u16) -> [u8; 2] {
    length.to_be_bytes()
}

/// Sizes travel as (size - 1) so that 256 fits in one byte.
/// Returns `None` for sizes the field cannot carry (0 or above 256).
pub fn encode_chunk_size_field(size: usize) -> Option<u8> {
    size.checked_sub(1).and_then(|field| u8::try_from(field).ok())
}

pub fn decode_chunk_size_field(field: u8) -> usize {
    field as usize + 1
}

/// Number of blocks the board expects for a program of `length` bytes
pub fn block_count(length: usize) -> usize {
    length.div_ceil(BLOCK_SIZE)
}

/// Block `index` of a program; only the last may be short, and any
/// index past the end is empty.
pub fn block_at(program: &[u8], index: usize) -> &[u8] {
    let start = index.saturating_mul(BLOCK_SIZE).min(program.len());
    let end = start.saturating_add(BLOCK_SIZE).min(program.len());
    &program[start..end]
}

// ============================================================================
// Tests
// ============================================================================
