// Copyright (C) 2026 Brian Johnson
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

// XMODEM/YMODEM serial file transfer
use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use std::time::Duration;
use ymodem::serial::RealSerialPort;
use ymodem::storage::{FileSink, FileSource};
use ymodem::{Mode, SessionConfig, TransferError, TransferStats};

#[derive(Parser)]
#[command(name = "ymodem")]
#[command(about = "XMODEM/YMODEM file transfer over a serial line", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
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

    /// Attempts per packet before giving up
    #[arg(long, default_value = "10", value_name = "N")]
    retries: u32,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file
    Receive {
        /// Where to store the received data
        file: PathBuf,

        /// Strip trailing CTRL-Z padding from every block
        #[arg(long)]
        text: bool,

        /// Ask for 8-bit checksums instead of CRC-16
        #[arg(long)]
        checksum: bool,

        /// Seconds to wait before asking the sender to start
        #[arg(long, default_value = "20", value_name = "SECS")]
        settle_delay: u64,
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

fn exit_with(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let data_bits = parse_data_bits(cli.data_bits).unwrap_or_else(|e| exit_with(e));
    let parity = parse_parity(&cli.parity).unwrap_or_else(|e| exit_with(e));
    let stop_bits = parse_stop_bits(cli.stop_bits).unwrap_or_else(|e| exit_with(e));

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial_port = RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits)
        .unwrap_or_else(|e| exit_with(format!("Failed to open serial port: {}", e)));

    let mut config = SessionConfig {
        max_retries: cli.retries,
        ..SessionConfig::default()
    };

    match cli.command {
        Commands::Send { file } => {
            println!("\nSending file: {}", file.display());
            match send_file(serial_port, file, config) {
                Ok(stats) => println!("\nFile sent successfully! {} blocks, {} bytes", stats.blocks, stats.bytes),
                Err(e) => exit_with(format!("Send failed: {}", e)),
            }
        }
        Commands::Receive { file, text, checksum, settle_delay } => {
            config.text_mode = text;
            config.settle_delay = Duration::from_secs(settle_delay);
            if checksum {
                config.mode = Mode::Checksum;
            }

            println!("\nReceiving to: {}", file.display());
            match receive_file(serial_port, file, config) {
                Ok(stats) => println!("\nFile received successfully! {} blocks, {} bytes", stats.blocks, stats.bytes),
                Err(e) => exit_with(format!("Receive failed: {}", e)),
            }
        }
    }
}

fn send_file(serial_port: RealSerialPort, file: PathBuf, config: SessionConfig) -> Result<TransferStats, TransferError> {
    if !file.exists() {
        return Err(TransferError::Storage(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", file.display()),
        )));
    }

    let source = FileSource::open(&file).map_err(TransferError::Storage)?;
    ymodem::send(Box::new(serial_port), Box::new(source), config)
}

fn receive_file(serial_port: RealSerialPort, file: PathBuf, config: SessionConfig) -> Result<TransferStats, TransferError> {
    if let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            return Err(TransferError::Storage(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Output directory not found: {}", dir.display()),
            )));
        }
    }

    let sink = FileSink::create(&file).map_err(TransferError::Storage)?;
    ymodem::receive(Box::new(serial_port), Box::new(sink), config)
}
