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

use std::path::PathBuf;
use thiserror::Error;

use crate::loader::TransferState;
use crate::protocol::{MAX_PROGRAM_SIZE, RAM_BUFFER_SIZE, ResponseCode};

/// Broad failure classes; none of them is retried by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected on the host before any byte crossed the wire
    LocalValidation,
    /// Nothing arrived in time, or the board reported its own timeout
    Timeout,
    /// The board rejected a step or answered something unexpected
    Protocol,
    /// The serial device itself failed
    Transport,
}

impl ErrorClass {
    /// Process exit code used by the command line tools
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Transport => 1,
            ErrorClass::LocalValidation => 2,
            ErrorClass::Timeout => 3,
            ErrorClass::Protocol => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("program is empty")]
    EmptyProgram,

    #[error("program is too big: {0} bytes (max. {max} bytes)", max = MAX_PROGRAM_SIZE)]
    ProgramTooLarge(usize),

    #[error("RAM upload of {0} bytes is out of range (1 to {max} bytes)", max = RAM_BUFFER_SIZE)]
    RamPayloadSize(usize),

    #[error("block of {0} bytes cannot be framed")]
    InvalidBlockSize(usize),

    #[error("unable to open program file '{}': {source}", .path.display())]
    ProgramUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no serial ports found")]
    NoPortsFound,

    #[error("no port selected")]
    NoPortSelected,

    #[error("no response from the board")]
    Timeout,

    #[error("board rejected the request: {0}")]
    Rejected(ResponseCode),

    #[error("board rejected block {block}: {code}")]
    BlockRejected { block: usize, code: ResponseCode },

    #[error("unexpected response byte 0x{0:02X}")]
    UnexpectedResponse(u8),

    #[error("echo mismatch: sent {sent}, received {received}")]
    EchoMismatch { sent: u8, received: u8 },

    #[error("board expects {reported} blocks, program has {expected}")]
    BlockCountMismatch { expected: usize, reported: u8 },

    #[error("RAM readback differs at offset {offset}: expected 0x{expected:02X}, received 0x{received:02X}")]
    ReadbackMismatch { offset: usize, expected: u8, received: u8 },

    #[error("checksum mismatch: computed 0x{computed:02X}, received 0x{received:02X}")]
    ChecksumMismatch { computed: u8, received: u8 },

    #[error("{source} (in state: {state})")]
    Aborted {
        state: TransferState,
        #[source]
        source: Box<LinkError>,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl LinkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LinkError::EmptyProgram
            | LinkError::ProgramTooLarge(_)
            | LinkError::RamPayloadSize(_)
            | LinkError::InvalidBlockSize(_)
            | LinkError::ProgramUnreadable { .. }
            | LinkError::NoPortsFound
            | LinkError::NoPortSelected => ErrorClass::LocalValidation,
            LinkError::Timeout | LinkError::Rejected(ResponseCode::Timeout) => ErrorClass::Timeout,
            LinkError::Rejected(_)
            | LinkError::BlockRejected { .. }
            | LinkError::UnexpectedResponse(_)
            | LinkError::EchoMismatch { .. }
            | LinkError::BlockCountMismatch { .. }
            | LinkError::ReadbackMismatch { .. }
            | LinkError::ChecksumMismatch { .. } => ErrorClass::Protocol,
            LinkError::Aborted { source, .. } => source.class(),
            LinkError::Serial(_) | LinkError::Io(_) => ErrorClass::Transport,
        }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => LinkError::Timeout,
            _ => LinkError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_io_becomes_timeout() {
        let err: LinkError = std::io::Error::new(std::io::ErrorKind::TimedOut, "Mock timeout").into();
        assert!(matches!(err, LinkError::Timeout));

        let err: LinkError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, LinkError::Io(_)));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(LinkError::ProgramTooLarge(70000).class(), ErrorClass::LocalValidation);
        assert_eq!(LinkError::Timeout.class(), ErrorClass::Timeout);
        assert_eq!(LinkError::Rejected(ResponseCode::Timeout).class(), ErrorClass::Timeout);
        assert_eq!(LinkError::Rejected(ResponseCode::UnknownCommand).class(), ErrorClass::Protocol);

        let aborted = LinkError::Aborted {
            state: TransferState::AwaitBlockDataAck { block: 1 },
            source: Box::new(LinkError::BlockRejected { block: 1, code: ResponseCode::ChecksumFailed }),
        };
        assert_eq!(aborted.class(), ErrorClass::Protocol);
        assert_eq!(
            aborted.to_string(),
            "board rejected block 1: CHECKSUM_FAILED (3) (in state: AwaitBlockDataAck(1))"
        );
    }
}
