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

use std::io::{BufRead, Read, Write};
use std::time::Duration;
use serialport::{
    DataBits, FlowControl, Parity, SerialPort as SerialPortTrait, SerialPortInfo, SerialPortType, StopBits,
};
use crate::error::LinkError;

/// USB vendor ID programmed into the board's MCP2221A
pub const BOARD_USB_VID: u16 = 0x1209;

/// USB product ID programmed into the board's MCP2221A
pub const BOARD_USB_PID: u16 = 0x80A0;

pub const DEFAULT_BAUD_RATE: u32 = 9600;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte channel the link protocol runs over
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Fill `buf` completely, each read bounded by `timeout`.
    /// A read that returns no data counts as a timeout.
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_timeout(&mut buf[filled..], timeout)? {
                0 => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("received {} of {} bytes", filled, buf.len()),
                    ));
                }
                n => filled += n,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate.
/// The port is closed when this value is dropped.
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    /// The MCP2221A only supports 8 data bits, no parity and one stop bit.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.read(buf)
    }
}

// ============================================================================
// Port Detection
// ============================================================================

/// USB serial ports whose vendor and product IDs match the board
pub fn find_board_ports(ports: &[SerialPortInfo], vid: u16, pid: u16) -> Vec<&SerialPortInfo> {
    ports
        .iter()
        .filter(|p| matches!(&p.port_type, SerialPortType::UsbPort(usb) if usb.vid == vid && usb.pid == pid))
        .collect()
}

/// Find the board among the enumerated ports, asking the user to pick
/// one on stdin when there is not exactly one match.
pub fn detect_port(vid: u16, pid: u16) -> Result<String, LinkError> {
    let ports = serialport::available_ports()?;

    let boards = find_board_ports(&ports, vid, pid);
    if let [board] = boards.as_slice() {
        info!("Single ATMega-Z80 board found on port: {}", board.port_name);
        return Ok(board.port_name.clone());
    }

    warn!("Unable to auto-detect the port for the ATMega-Z80 board ({} candidates)", boards.len());
    let stdin = std::io::stdin();
    select_port(&ports, &mut stdin.lock(), &mut std::io::stdout())
}

/// List every port on `output` and read the chosen index from `input`
pub fn select_port<R: BufRead, W: Write>(
    ports: &[SerialPortInfo],
    input: &mut R,
    output: &mut W,
) -> Result<String, LinkError> {
    if ports.is_empty() {
        return Err(LinkError::NoPortsFound);
    }

    for (idx, port) in ports.iter().enumerate() {
        writeln!(output, "[{}] :   {}", idx, port.port_name)?;
        writeln!(output, "          {}", describe_port_type(&port.port_type))?;
    }
    writeln!(output, "[anything else] :   exit...")?;
    write!(output, "Your choice? ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    match line.trim().parse::<usize>() {
        Ok(idx) if idx < ports.len() => {
            info!("Using port for the ATMega-Z80 board: {}", ports[idx].port_name);
            Ok(ports[idx].port_name.clone())
        }
        _ => Err(LinkError::NoPortSelected),
    }
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => format!(
            "usb: VID={:04x} PID={:04x} {}",
            usb.vid,
            usb.pid,
            usb.product.as_deref().unwrap_or("")
        ),
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    // Error kind returned once the responses run out
    exhausted: std::io::ErrorKind,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            exhausted: std::io::ErrorKind::TimedOut,
        }
    }

    /// Fail every read past the scripted responses with `kind`
    pub fn then_fail_with(mut self, kind: std::io::ErrorKind) -> Self {
        self.exhausted = kind;
        self
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        // Out of responses = timeout, unless told otherwise
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(self.exhausted, "Mock exhausted"));
        }

        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,
            }
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb_port(name: &str, vid: u16, pid: u16) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: Some("ATMega-Z80 hobby computer".to_string()),
            }),
        }
    }

    fn plain_port(name: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::Unknown,
        }
    }

    #[test]
    fn test_read_exact_timeout() {
        let mut port = MockSerialPort::new(vec![Some(15), Some(1), None], vec![]);
        let mut buf = [0u8; 2];
        port.read_exact_timeout(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(buf, [15, 1]);

        let err = port.read_exact_timeout(&mut buf, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_exhausted_reads_fail_with_configured_kind() {
        let mut port = MockSerialPort::new(vec![Some(1)], vec![])
            .then_fail_with(std::io::ErrorKind::BrokenPipe);
        let mut buf = [0u8; 2];

        let err = port.read_exact_timeout(&mut buf, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_find_board_ports() {
        let ports = vec![
            plain_port("/dev/ttyS0"),
            usb_port("/dev/ttyACM0", 0x04D8, 0x00DD),
            usb_port("/dev/ttyACM1", BOARD_USB_VID, BOARD_USB_PID),
        ];

        let boards = find_board_ports(&ports, BOARD_USB_VID, BOARD_USB_PID);
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].port_name, "/dev/ttyACM1");

        assert!(find_board_ports(&ports, 0x1234, 0x5678).is_empty());
    }

    #[test]
    fn test_select_port() {
        let ports = vec![plain_port("/dev/ttyS0"), usb_port("/dev/ttyACM0", 0x04D8, 0x00DD)];

        let mut output = Vec::new();
        let port = select_port(&ports, &mut "1\n".as_bytes(), &mut output).unwrap();
        assert_eq!(port, "/dev/ttyACM0");

        let listing = String::from_utf8(output).unwrap();
        assert!(listing.contains("[0] :   /dev/ttyS0"));
        assert!(listing.contains("VID=04d8 PID=00dd"));
    }

    #[test]
    fn test_select_port_rejects_other_input() {
        let ports = vec![plain_port("/dev/ttyS0")];

        for input in ["q\n", "1\n", "\n"] {
            let result = select_port(&ports, &mut input.as_bytes(), &mut Vec::<u8>::new());
            assert!(matches!(result, Err(LinkError::NoPortSelected)));
        }

        let result = select_port(&[], &mut "0\n".as_bytes(), &mut Vec::<u8>::new());
        assert!(matches!(result, Err(LinkError::NoPortsFound)));
    }
}
