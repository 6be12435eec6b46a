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

use clap::Parser;
use indicatif::ProgressBar;
use std::path::PathBuf;
use z80_loader::LinkError;
use z80_loader::cli::ConnectionArgs;
use z80_loader::loader::read_program;
use z80_loader::protocol::block_count;

#[derive(Parser)]
#[command(name = "z80-loader")]
#[command(about = "Z80 program loader for the ATMega-Z80 hobby computer", long_about = None)]
struct Cli {
    /// Z80 program file to load (binary format)
    program: PathBuf,

    #[command(flatten)]
    connection: ConnectionArgs,
}

fn main() {
    let cli = Cli::parse();
    cli.connection.init_logging();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(e.class().exit_code());
    }

    println!("\nProgram loaded successfully!");
}

fn run(cli: &Cli) -> Result<(), LinkError> {
    // Checked before the port is touched
    let program = read_program(&cli.program)?;
    println!("Loading: {} ({} bytes)", cli.program.display(), program.len());

    let mut link = cli.connection.open_link()?;

    let progress = ProgressBar::new(block_count(program.len()) as u64);
    let result = link.load_program_with(&program, |acked, _total| {
        progress.set_position(acked as u64);
    });

    match &result {
        Ok(()) => progress.finish(),
        Err(_) => progress.abandon(),
    }
    result
}
