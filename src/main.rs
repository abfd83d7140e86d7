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

// Echolink protocol implementation
mod protocol;
mod crc;
mod store;
mod sender;
mod receiver;
mod serial;

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use protocol::{DEFAULT_CHUNK_LEN, DEFAULT_STORE_CAPACITY};
use serial::RealSerialPort;

#[derive(Parser)]
#[command(name = "echolink")]
#[command(about = "Chunked text transfer with CRC-16 validation and echo-back over a serial link", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "2400")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file in CRC-16 checksummed chunks and collect the echoed store
    Send {
        /// File whose contents to send
        file: PathBuf,

        /// Payload bytes per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_LEN, value_name = "BYTES")]
        chunk_size: usize,

        /// Delay in milliseconds between chunks
        #[arg(long, default_value = "100", value_name = "MS")]
        chunk_delay: u64,
    },
    /// Validate, store and echo back incoming chunks (device role)
    Receive {
        /// Circular store capacity in bytes
        #[arg(long, default_value_t = DEFAULT_STORE_CAPACITY, value_name = "BYTES")]
        capacity: usize,

        /// Exit after serving a single session
        #[arg(long)]
        once: bool,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn main() {
    let cli = Cli::parse();

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Send { file, chunk_size, chunk_delay } => {
            if chunk_size == 0 {
                eprintln!("Error: chunk size must be at least 1 byte");
                std::process::exit(1);
            }

            println!("\nSending file: {}", file.display());
            if let Err(e) = send_payload(serial_port, file, chunk_size, chunk_delay, cli.debug) {
                eprintln!("Send failed: {}", e);
                std::process::exit(1);
            }
            println!("\nTransfer complete!");
        }
        Commands::Receive { capacity, once } => {
            if capacity == 0 {
                eprintln!("Error: store capacity must be at least 1 byte");
                std::process::exit(1);
            }

            println!("\nReceiving ({} byte store)", capacity);
            if let Err(e) = receive_chunks(serial_port, capacity, once, cli.debug) {
                eprintln!("Receive failed: {}", e);
                std::process::exit(1);
            }
            println!("\nSession complete!");
        }
    }
}

fn send_payload(
    serial_port: RealSerialPort,
    file: PathBuf,
    chunk_size: usize,
    chunk_delay: u64,
    debug: bool,
) -> Result<(), sender::SenderError> {
    use sender::{SenderFsm, TransmitChunk};

    let payload = std::fs::read(&file)?;
    println!("Payload: {} bytes, {} byte chunks", payload.len(), chunk_size);

    let mut state = SenderFsm::<TransmitChunk>::new(
        Box::new(serial_port),
        payload,
        chunk_size,
        chunk_delay,
        debug,
    );

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(sender::SenderError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

fn receive_chunks(
    serial_port: RealSerialPort,
    capacity: usize,
    once: bool,
    debug: bool,
) -> Result<(), receiver::ReceiverError> {
    use receiver::{ReceiverFsm, Accumulate};

    let mut state = ReceiverFsm::<Accumulate>::new(Box::new(serial_port), capacity, once, debug);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(receiver::ReceiverError::SessionComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}
