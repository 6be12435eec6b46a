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

//! Bulk program upload (LOAD_BINARY).
//!
//! The driver mirrors what the board is waiting for as a typestate:
//! each `step` performs one exchange and hands back the next state.
//! A failing step consumes the machine and returns
//! [`LinkError::Aborted`] carrying the state it failed in.

use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;
use crate::checksum::checksum;
use crate::error::LinkError;
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// States
// ============================================================================

pub struct Idle;
pub struct AwaitLengthAck;
pub struct AwaitBlockCount;
pub struct AwaitChunkSizeAck;
pub struct AwaitBlockDataAck;
pub struct Done;

/// Tag of the exchange the driver is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    AwaitLengthAck,
    AwaitBlockCount,
    AwaitChunkSizeAck { block: usize },
    AwaitBlockDataAck { block: usize },
    Done,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Idle => write!(f, "Idle"),
            TransferState::AwaitLengthAck => write!(f, "AwaitLengthAck"),
            TransferState::AwaitBlockCount => write!(f, "AwaitBlockCount"),
            TransferState::AwaitChunkSizeAck { block } => write!(f, "AwaitChunkSizeAck({})", block),
            TransferState::AwaitBlockDataAck { block } => write!(f, "AwaitBlockDataAck({})", block),
            TransferState::Done => write!(f, "Done"),
        }
    }
}

// ============================================================================
// FSM Structure
// ============================================================================

pub struct LoaderFsm<'a, State> {
    state: PhantomData<State>,
    serial: &'a mut dyn SerialPort,
    program: &'a [u8],
    block_idx: usize,
    block_count: usize,
    timeout: Duration,
}

// ============================================================================
// Trait
// ============================================================================

pub trait LoaderState<'a> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState<'a> + 'a>, LinkError>;

    fn state(&self) -> TransferState;

    /// Blocks the board has acknowledged so far
    fn blocks_acked(&self) -> usize;

    fn block_count(&self) -> usize;
}

// ============================================================================
// Helpers
// ============================================================================

impl<'a, S> LoaderFsm<'a, S> {
    fn transition<T>(self) -> Box<LoaderFsm<'a, T>> {
        Box::new(LoaderFsm {
            state: PhantomData,
            serial: self.serial,
            program: self.program,
            block_idx: self.block_idx,
            block_count: self.block_count,
            timeout: self.timeout,
        })
    }

    fn read_u8(&mut self) -> Result<u8, LinkError> {
        let mut buf = [0u8; 1];
        self.serial.read_exact_timeout(&mut buf, self.timeout)?;
        Ok(buf[0])
    }

    fn read_response(&mut self) -> Result<ResponseCode, LinkError> {
        let byte = self.read_u8()?;
        ResponseCode::try_from(byte).map_err(LinkError::UnexpectedResponse)
    }

    fn current_block(&self) -> &'a [u8] {
        block_at(self.program, self.block_idx)
    }
}

macro_rules! impl_progress {
    () => {
        fn blocks_acked(&self) -> usize {
            self.block_idx
        }

        fn block_count(&self) -> usize {
            self.block_count
        }
    };
}

/// Wrap a step failure with the state it happened in
fn abort(state: TransferState, cause: LinkError) -> LinkError {
    LinkError::Aborted { state, source: Box::new(cause) }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> LoaderState<'a> for LoaderFsm<'a, Idle> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState<'a> + 'a>, LinkError> {
        let fsm = *self;
        let state = fsm.state();

        let length = u16::try_from(fsm.program.len())
            .map_err(|_| abort(state, LinkError::ProgramTooLarge(fsm.program.len())))?;

        let mut request = vec![Command::LoadBinary.code()];
        request.extend_from_slice(&encode_length(length));
        fsm.serial.write_all(&request).map_err(|e| abort(state, e.into()))?;
        debug!("Sent: LOAD_BINARY, length {}", length);

        let next = fsm.transition::<AwaitLengthAck>();
        Ok(next as Box<dyn LoaderState<'a> + 'a>)
    }

    fn state(&self) -> TransferState {
        TransferState::Idle
    }

    impl_progress!();
}

impl<'a> LoaderState<'a> for LoaderFsm<'a, AwaitLengthAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState<'a> + 'a>, LinkError> {
        let mut fsm = *self;
        let state = fsm.state();

        match fsm.read_response().map_err(|e| abort(state, e))? {
            ResponseCode::Ok => {
                debug!("Received: OK (length accepted)");
                let next = fsm.transition::<AwaitBlockCount>();
                Ok(next as Box<dyn LoaderState<'a> + 'a>)
            }
            ResponseCode::Timeout => {
                // The board gave up before the length arrived and now parses
                // each length byte as a command, answering UNKNOWN_COMMAND twice.
                warn!("Board timed out waiting for the program length");
                for _ in 0..2 {
                    match fsm.read_u8() {
                        Ok(byte) if byte == ResponseCode::UnknownCommand.code() => {
                            debug!("Received: UNKNOWN_COMMAND (stray length byte)");
                        }
                        Ok(byte) => {
                            warn!("Unexpected byte 0x{:02X} while draining the link", byte);
                        }
                        Err(LinkError::Timeout) => break,
                        Err(e) => return Err(abort(state, e)),
                    }
                }
                Err(abort(state, LinkError::Rejected(ResponseCode::Timeout)))
            }
            code => {
                debug!("Received: {}", code);
                Err(abort(state, LinkError::Rejected(code)))
            }
        }
    }

    fn state(&self) -> TransferState {
        TransferState::AwaitLengthAck
    }

    impl_progress!();
}

impl<'a> LoaderState<'a> for LoaderFsm<'a, AwaitBlockCount> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState<'a> + 'a>, LinkError> {
        let mut fsm = *self;
        let state = fsm.state();

        let reported = fsm.read_u8().map_err(|e| abort(state, e))?;
        debug!("Received: block count {}", reported);

        if reported as usize != fsm.block_count {
            return Err(abort(state, LinkError::BlockCountMismatch {
                expected: fsm.block_count,
                reported,
            }));
        }

        fsm.block_idx = 0;
        let next = fsm.transition::<AwaitChunkSizeAck>();
        Ok(next as Box<dyn LoaderState<'a> + 'a>)
    }

    fn state(&self) -> TransferState {
        TransferState::AwaitBlockCount
    }

    impl_progress!();
}

impl<'a> LoaderState<'a> for LoaderFsm<'a, AwaitChunkSizeAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState<'a> + 'a>, LinkError> {
        let fsm = *self;
        let state = fsm.state();

        let size = fsm.current_block().len();
        let field = encode_chunk_size_field(size)
            .ok_or_else(|| abort(state, LinkError::InvalidBlockSize(size)))?;

        fsm.serial.write_all(&[field]).map_err(|e| abort(state, e.into()))?;
        debug!("Sent: chunk size field {} (block {}, {} bytes)", field, fsm.block_idx, size);

        let next = fsm.transition::<AwaitBlockDataAck>();
        Ok(next as Box<dyn LoaderState<'a> + 'a>)
    }

    fn state(&self) -> TransferState {
        TransferState::AwaitChunkSizeAck { block: self.block_idx }
    }

    impl_progress!();
}

impl<'a> LoaderState<'a> for LoaderFsm<'a, AwaitBlockDataAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState<'a> + 'a>, LinkError> {
        let mut fsm = *self;
        let state = fsm.state();

        let block = fsm.current_block();
        let sum = checksum(block);
        let mut frame = Vec::with_capacity(block.len() + 1);
        frame.extend_from_slice(block);
        frame.push(sum);
        fsm.serial.write_all(&frame).map_err(|e| abort(state, e.into()))?;
        debug!("Sent: block {} ({} bytes), checksum 0x{:02X}", fsm.block_idx, block.len(), sum);

        match fsm.read_response().map_err(|e| abort(state, e))? {
            ResponseCode::Ok => {
                debug!("Received: OK (block {})", fsm.block_idx);
                fsm.block_idx += 1;
                if fsm.block_idx == fsm.block_count {
                    let next = fsm.transition::<Done>();
                    Ok(next as Box<dyn LoaderState<'a> + 'a>)
                } else {
                    let next = fsm.transition::<AwaitChunkSizeAck>();
                    Ok(next as Box<dyn LoaderState<'a> + 'a>)
                }
            }
            code => {
                debug!("Received: {} (block {})", code, fsm.block_idx);
                Err(abort(state, LinkError::BlockRejected { block: fsm.block_idx, code }))
            }
        }
    }

    fn state(&self) -> TransferState {
        TransferState::AwaitBlockDataAck { block: self.block_idx }
    }

    impl_progress!();
}

impl<'a> LoaderState<'a> for LoaderFsm<'a, Done> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState<'a> + 'a>, LinkError> {
        Ok(self as Box<dyn LoaderState<'a> + 'a>)
    }

    fn state(&self) -> TransferState {
        TransferState::Done
    }

    impl_progress!();
}

// ============================================================================
// Constructor & Validation
// ============================================================================

impl<'a> LoaderFsm<'a, Idle> {
    /// Fails before touching the port if the program is out of range.
    pub fn new(
        serial: &'a mut dyn SerialPort,
        program: &'a [u8],
        timeout: Duration,
    ) -> Result<Box<dyn LoaderState<'a> + 'a>, LinkError> {
        validate_program(program)?;

        Ok(Box::new(LoaderFsm {
            state: PhantomData::<Idle>,
            serial,
            program,
            block_idx: 0,
            block_count: block_count(program.len()),
            timeout,
        }))
    }
}

pub fn validate_program(program: &[u8]) -> Result<(), LinkError> {
    if program.is_empty() {
        return Err(LinkError::EmptyProgram);
    }
    if program.len() > MAX_PROGRAM_SIZE {
        return Err(LinkError::ProgramTooLarge(program.len()));
    }
    Ok(())
}

/// Read a program image and check that the board can take it
pub fn read_program(path: &Path) -> Result<Vec<u8>, LinkError> {
    let program = fs::read(path).map_err(|source| LinkError::ProgramUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    validate_program(&program)?;
    Ok(program)
}

// ============================================================================
// Tests
// ============================================================================
