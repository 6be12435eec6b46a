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

use std::time::Duration;
use crate::checksum::checksum;
use crate::error::LinkError;
use crate::loader::{LoaderFsm, LoaderState, TransferState};
use crate::protocol::*;
use crate::serial::SerialPort;

/// Values echoed by the self test
const SELF_TEST_ECHOES: [u8; 3] = [67, 5, 163];

#[derive(Debug, Clone, PartialEq)]
pub struct LinkOptions {
    /// How long to wait for each response from the board
    pub response_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions { response_timeout: Duration::from_secs(2) }
    }
}

/// Host side of the ATMega-Z80 serial link.
///
/// Owns the port for as long as it lives; only one exchange is ever in
/// flight. Dropping the link closes the port.
pub struct Link {
    serial: Box<dyn SerialPort>,
    options: LinkOptions,
}

impl Link {
    pub fn new(serial: Box<dyn SerialPort>, options: LinkOptions) -> Self {
        Link { serial, options }
    }

    /// Round-trip one byte through the board
    pub fn echo(&mut self, value: u8) -> Result<u8, LinkError> {
        self.serial.write_all(&[Command::Echo.code(), value])?;
        debug!("Sent: ECHO {}", value);

        let received = self.read_u8()?;
        debug!("Received: {}", received);

        if received != value {
            return Err(LinkError::EchoMismatch { sent: value, received });
        }
        Ok(received)
    }

    /// Upload and start a program, see [`crate::loader`]
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), LinkError> {
        self.load_program_with(program, |_, _| {})
    }

    /// Like [`Link::load_program`], calling `on_block(acked, total)` after
    /// every block the board accepts.
    pub fn load_program_with<F>(&mut self, program: &[u8], mut on_block: F) -> Result<(), LinkError>
    where
        F: FnMut(usize, usize),
    {
        let mut fsm = LoaderFsm::new(self.serial.as_mut(), program, self.options.response_timeout)?;
        info!("Uploading {} bytes in {} blocks", program.len(), fsm.block_count());

        while fsm.state() != TransferState::Done {
            let acked = fsm.blocks_acked();
            fsm = fsm.step()?;
            if fsm.blocks_acked() > acked {
                on_block(fsm.blocks_acked(), fsm.block_count());
            }
        }

        info!("Program uploaded");
        Ok(())
    }

    /// Write up to 16 bytes into the RAM working buffer
    pub fn upload_to_ram(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if bytes.len() > RAM_BUFFER_SIZE {
            return Err(LinkError::RamPayloadSize(bytes.len()));
        }
        let field = encode_chunk_size_field(bytes.len()).ok_or_else(|| LinkError::RamPayloadSize(bytes.len()))?;

        let mut request = Vec::with_capacity(bytes.len() + 3);
        request.push(Command::UploadToRam.code());
        request.push(field);
        request.extend_from_slice(bytes);
        request.push(checksum(bytes));
        self.serial.write_all(&request)?;
        debug!("Sent: UPLOAD_TO_RAM {:02X?}", bytes);

        match self.read_response()? {
            ResponseCode::Ok => {
                debug!("Received: OK");
                Ok(())
            }
            code => Err(LinkError::Rejected(code)),
        }
    }

    /// Read back the first 16 bytes of RAM, verifying the trailing checksum
    pub fn read_ram_first_16(&mut self) -> Result<[u8; RAM_BUFFER_SIZE], LinkError> {
        self.serial.write_all(&[Command::ReadRamFirst16.code()])?;
        debug!("Sent: READ_RAM_FIRST_16");

        let field = self.read_u8()?;
        if decode_chunk_size_field(field) != RAM_BUFFER_SIZE {
            return Err(LinkError::UnexpectedResponse(field));
        }

        let mut data = [0u8; RAM_BUFFER_SIZE];
        self.serial.read_exact_timeout(&mut data, self.options.response_timeout)?;
        let received = self.read_u8()?;
        debug!("Received: {:02X?}, checksum 0x{:02X}", data, received);

        let computed = checksum(&data);
        if computed != received {
            return Err(LinkError::ChecksumMismatch { computed, received });
        }
        Ok(data)
    }

    /// Echo a few values, then round-trip 16 bytes through RAM
    pub fn self_test(&mut self) -> Result<(), LinkError> {
        for value in SELF_TEST_ECHOES {
            self.echo(value)?;
            info!("Echo {}: OK", value);
        }

        let pattern: Vec<u8> = (0..RAM_BUFFER_SIZE as u8).collect();
        self.upload_to_ram(&pattern)?;
        info!("RAM upload: OK");

        let readback = self.read_ram_first_16()?;
        if let Some(offset) = readback.iter().zip(&pattern).position(|(a, b)| a != b) {
            return Err(LinkError::ReadbackMismatch {
                offset,
                expected: pattern[offset],
                received: readback[offset],
            });
        }
        info!("RAM readback: OK");
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, LinkError> {
        let mut buf = [0u8; 1];
        self.serial.read_exact_timeout(&mut buf, self.options.response_timeout)?;
        Ok(buf[0])
    }

    fn read_response(&mut self) -> Result<ResponseCode, LinkError> {
        let byte = self.read_u8()?;
        ResponseCode::try_from(byte).map_err(LinkError::UnexpectedResponse)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::serial::MockSerialPort;

    fn link(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Link {
        let options = LinkOptions { response_timeout: Duration::from_millis(100) };
        Link::new(Box::new(MockSerialPort::new(responses, expected_writes)), options)
    }

    #[test]
    fn test_echo() {
        let mut link = link(
            vec![Some(67), Some(5), Some(163)],
            vec![2, 67, 2, 5, 2, 163],
        );

        assert_eq!(link.echo(67).unwrap(), 67);
        assert_eq!(link.echo(5).unwrap(), 5);
        assert_eq!(link.echo(163).unwrap(), 163);
    }

    #[test]
    fn test_echo_timeout() {
        let mut link = link(vec![None], vec![2, 42]);

        let err = link.echo(42).unwrap_err();
        assert!(matches!(err, LinkError::Timeout));
        assert_eq!(err.class(), ErrorClass::Timeout);
    }

    #[test]
    fn test_echo_mismatch() {
        let mut link = link(vec![Some(4)], vec![2, 42]);
        assert!(matches!(link.echo(42), Err(LinkError::EchoMismatch { sent: 42, received: 4 })));
    }

    #[test]
    fn test_upload_to_ram() {
        let bytes: Vec<u8> = (0..11).collect();

        let mut expected_writes = vec![3, 10];
        expected_writes.extend_from_slice(&bytes);
        expected_writes.push(0x0B);

        let mut link = link(vec![Some(0)], expected_writes);
        link.upload_to_ram(&bytes).expect("Upload failed");
    }

    #[test]
    fn test_upload_to_ram_rejected() {
        let bytes: Vec<u8> = (0..11).collect();

        let mut expected_writes = vec![3, 10];
        expected_writes.extend_from_slice(&bytes);
        expected_writes.push(0x0B);

        let mut link = link(vec![Some(ResponseCode::ChecksumFailed.code())], expected_writes);
        assert!(matches!(
            link.upload_to_ram(&bytes),
            Err(LinkError::Rejected(ResponseCode::ChecksumFailed))
        ));
    }

    #[test]
    fn test_upload_to_ram_size_checked_locally() {
        let mut link = link(vec![], vec![]);

        assert!(matches!(link.upload_to_ram(&[0u8; 17]), Err(LinkError::RamPayloadSize(17))));
        assert!(matches!(link.upload_to_ram(&[]), Err(LinkError::RamPayloadSize(0))));
    }

    #[test]
    fn test_ram_round_trip() {
        let bytes: Vec<u8> = (0..16).collect();

        let mut expected_writes = vec![3, 15];
        expected_writes.extend_from_slice(&bytes);
        expected_writes.push(0);
        expected_writes.push(4);

        let mut responses = vec![Some(0), Some(15)];
        responses.extend(bytes.iter().map(|&b| Some(b)));
        responses.push(Some(0));

        let mut link = link(responses, expected_writes);
        link.upload_to_ram(&bytes).unwrap();
        assert_eq!(link.read_ram_first_16().unwrap().to_vec(), bytes);
    }

    #[test]
    fn test_read_ram_checksum_mismatch() {
        let mut responses = vec![Some(15)];
        responses.extend((0..16).map(Some));
        responses.push(Some(123));

        let mut link = link(responses, vec![4]);
        let err = link.read_ram_first_16().unwrap_err();
        assert!(matches!(err, LinkError::ChecksumMismatch { computed: 0, received: 123 }));
        assert_eq!(err.class(), ErrorClass::Protocol);
    }

    #[test]
    fn test_read_ram_unexpected_size() {
        let mut link = link(vec![Some(ResponseCode::UnknownCommand.code())], vec![4]);
        assert!(matches!(link.read_ram_first_16(), Err(LinkError::UnexpectedResponse(4))));
    }

    #[test]
    fn test_load_program_reports_progress() {
        let program = [0u8; 356];

        let mut expected_writes = vec![1, 0x01, 0x64];
        expected_writes.push(255);
        expected_writes.extend_from_slice(&[0u8; 256]);
        expected_writes.push(0);
        expected_writes.push(99);
        expected_writes.extend_from_slice(&[0u8; 100]);
        expected_writes.push(0);

        let mut link = link(vec![Some(0), Some(2), Some(0), Some(0)], expected_writes);

        let mut progress = Vec::new();
        link.load_program_with(&program, |acked, total| progress.push((acked, total)))
            .expect("Transfer failed");
        assert_eq!(progress, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_load_program_too_large_sends_nothing() {
        let mut link = link(vec![], vec![]);

        let err = link.load_program(&vec![0u8; MAX_PROGRAM_SIZE + 1]).unwrap_err();
        assert!(matches!(err, LinkError::ProgramTooLarge(65281)));
        assert_eq!(err.class(), ErrorClass::LocalValidation);
    }

    #[test]
    fn test_link_usable_after_length_timeout() {
        let mut link = link(
            vec![Some(1), Some(4), Some(4), Some(163)],
            vec![1, 0x00, 0x64, 2, 163],
        );

        let err = link.load_program(&[0u8; 100]).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Timeout);
        assert_eq!(link.echo(163).unwrap(), 163);
    }

    #[test]
    fn test_self_test() {
        let mut expected_writes = vec![2, 67, 2, 5, 2, 163, 3, 15];
        expected_writes.extend(0..16u8);
        expected_writes.push(0);
        expected_writes.push(4);

        let mut responses = vec![Some(67), Some(5), Some(163), Some(0), Some(15)];
        responses.extend((0..16u8).map(Some));
        responses.push(Some(0));

        let mut link = link(responses, expected_writes);
        link.self_test().expect("Self test failed");
    }

    #[test]
    fn test_self_test_detects_corrupted_ram() {
        let mut expected_writes = vec![2, 67, 2, 5, 2, 163, 3, 15];
        expected_writes.extend(0..16u8);
        expected_writes.push(0);
        expected_writes.push(4);

        // byte 3 flipped to 0x13 by the board, checksum consistent with it
        let mut readback: Vec<u8> = (0..16).collect();
        readback[3] = 0x13;
        let mut responses = vec![Some(67), Some(5), Some(163), Some(0), Some(15)];
        responses.extend(readback.iter().map(|&b| Some(b)));
        responses.push(Some(checksum(&readback)));

        let mut link = link(responses, expected_writes);
        assert!(matches!(
            link.self_test(),
            Err(LinkError::ReadbackMismatch { offset: 3, expected: 3, received: 0x13 })
        ));
    }
}
