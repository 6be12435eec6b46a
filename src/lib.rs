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

//! Host side of the ATMega-Z80 serial link: program loading and link
//! diagnostics over the board's USB serial bridge.

#[macro_use]
extern crate log;

pub mod checksum;
pub mod cli;
pub mod error;
pub mod link;
pub mod loader;
pub mod protocol;
pub mod serial;

pub use error::{ErrorClass, LinkError};
pub use link::{Link, LinkOptions};
