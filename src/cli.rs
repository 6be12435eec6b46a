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

//! Command line options shared by the loader and the diagnostics tool

use std::time::Duration;
use clap::Args;
use simplelog::{Config, LevelFilter, SimpleLogger};
use crate::error::LinkError;
use crate::link::{Link, LinkOptions};
use crate::serial::{self, RealSerialPort, DEFAULT_BAUD_RATE};

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Serial port of the ATMega-Z80 (default: autodetect)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// Time to wait for each response from the board
    #[arg(long, default_value = "2000", value_name = "MS")]
    pub timeout_ms: u64,

    /// USB vendor ID used for autodetection
    #[arg(long, default_value = "0x1209", value_parser = parse_hex_u16)]
    pub vid: u16,

    /// USB product ID used for autodetection
    #[arg(long, default_value = "0x80A0", value_parser = parse_hex_u16)]
    pub pid: u16,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Log level for console output (overrides --debug)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LevelFilter>,
}

impl ConnectionArgs {
    pub fn init_logging(&self) {
        let level = self.log_level.unwrap_or(if self.debug { LevelFilter::Debug } else { LevelFilter::Info });
        let _ = SimpleLogger::init(level, Config::default());
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions { response_timeout: Duration::from_millis(self.timeout_ms) }
    }

    /// Open the configured (or detected) port and wrap it in a [`Link`]
    pub fn open_link(&self) -> Result<Link, LinkError> {
        let port = match &self.port {
            Some(port) => port.clone(),
            None => serial::detect_port(self.vid, self.pid)?,
        };

        info!("Opening serial port: {} ({} baud, 8N1)", port, self.baud);
        let serial_port = RealSerialPort::open(&port, self.baud)?;
        Ok(Link::new(Box::new(serial_port), self.link_options()))
    }
}

/// Accepts `0x1209` as well as plain `1209`, both hexadecimal
pub fn parse_hex_u16(value: &str) -> Result<u16, String> {
    let digits = value.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("Invalid USB ID '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use crate::serial::{BOARD_USB_PID, BOARD_USB_VID};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        connection: ConnectionArgs,
    }

    #[test]
    fn test_parse_hex_u16() {
        assert_eq!(parse_hex_u16("0x1209"), Ok(0x1209));
        assert_eq!(parse_hex_u16("80A0"), Ok(0x80A0));
        assert_eq!(parse_hex_u16("0X04d8"), Ok(0x04D8));
        assert!(parse_hex_u16("0x10000").is_err());
        assert!(parse_hex_u16("board").is_err());
    }

    #[test]
    fn test_defaults_match_board() {
        let cli = TestCli::parse_from(["z80-loader"]);

        assert_eq!(cli.connection.port, None);
        assert_eq!(cli.connection.baud, DEFAULT_BAUD_RATE);
        assert_eq!(cli.connection.vid, BOARD_USB_VID);
        assert_eq!(cli.connection.pid, BOARD_USB_PID);
        assert!(!cli.connection.debug);
        assert_eq!(cli.connection.link_options(), LinkOptions::default());
    }

    #[test]
    fn test_overrides() {
        let cli = TestCli::parse_from([
            "z80-loader", "-p", "/dev/ttyACM0", "-b", "19200", "--timeout-ms", "500",
            "--pid", "0x00DD", "--log-level", "trace",
        ]);

        assert_eq!(cli.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.connection.baud, 19200);
        assert_eq!(cli.connection.pid, 0x00DD);
        assert_eq!(cli.connection.log_level, Some(LevelFilter::Trace));
        assert_eq!(cli.connection.link_options().response_timeout, Duration::from_millis(500));
    }
}
