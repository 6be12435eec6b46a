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

// Link diagnostics for the ATMega-Z80 board
use clap::{Parser, Subcommand};
use z80_loader::{Link, LinkError};
use z80_loader::cli::ConnectionArgs;
use z80_loader::protocol::RAM_BUFFER_SIZE;

#[derive(Parser)]
#[command(name = "z80-diag")]
#[command(about = "Exercise the serial link of the ATMega-Z80 hobby computer", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send bytes to the board and check they come back unchanged
    Echo {
        /// Values to echo (0-255)
        #[arg(required = true)]
        values: Vec<u8>,
    },
    /// Upload up to 16 bytes into the board's RAM buffer
    UploadRam {
        /// Bytes as a hex string, e.g. 3e02d30176
        #[arg(value_parser = parse_ram_payload)]
        bytes: RamPayload,
    },
    /// Read back the first 16 bytes of RAM
    ReadRam,
    /// Run the echo and RAM round-trip checks
    SelfTest,
}

#[derive(Clone, Debug)]
struct RamPayload(Vec<u8>);

fn parse_ram_payload(value: &str) -> Result<RamPayload, String> {
    let bytes = hex::decode(value).map_err(|e| format!("Invalid hex '{}': {}", value, e))?;
    if bytes.is_empty() || bytes.len() > RAM_BUFFER_SIZE {
        return Err(format!("Expected 1 to {} bytes, got {}", RAM_BUFFER_SIZE, bytes.len()));
    }
    Ok(RamPayload(bytes))
}

fn main() {
    let cli = Cli::parse();
    cli.connection.init_logging();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(e.class().exit_code());
    }
}

fn run(cli: &Cli) -> Result<(), LinkError> {
    let mut link = cli.connection.open_link()?;
    execute(&mut link, &cli.command)
}

fn execute(link: &mut Link, command: &Commands) -> Result<(), LinkError> {
    match command {
        Commands::Echo { values } => {
            for &value in values {
                link.echo(value)?;
                println!("Echo {}: OK", value);
            }
        }
        Commands::UploadRam { bytes } => {
            link.upload_to_ram(&bytes.0)?;
            println!("Uploaded {} bytes", bytes.0.len());
        }
        Commands::ReadRam => {
            let data = link.read_ram_first_16()?;
            println!("{}", hex::encode(data));
        }
        Commands::SelfTest => {
            link.self_test()?;
            println!("\nLink self test passed!");
        }
    }
    Ok(())
}
