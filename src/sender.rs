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

use std::marker::PhantomData;
use std::time::{Duration, Instant};
use crate::crc::crc16;
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum SenderError {
    Io(std::io::Error),
    TransferComplete,
}

impl std::fmt::Display for SenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderError::Io(e) => write!(f, "I/O error: {}", e),
            SenderError::TransferComplete => write!(f, "Transfer complete"),
        }
    }
}

impl std::error::Error for SenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SenderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SenderError {
    fn from(err: std::io::Error) -> Self {
        SenderError::Io(err)
    }
}

// ============================================================================
// Chunk Framer
// ============================================================================

/// Serialize one chunk payload as a wire line: `<crc-decimal>,<payload>\n`.
pub fn encode_line(payload: &[u8]) -> Vec<u8> {
    let mut line = crc16(payload).to_string().into_bytes();
    line.push(FIELD_SEPARATOR);
    line.extend_from_slice(payload);
    line.push(LF);
    line
}

/// Split `payload` into consecutive slices of at most `chunk_len` bytes and
/// serialize each as a wire line, appending the sentinel line last. An empty
/// payload produces the sentinel line only.
pub fn frame_lines(payload: &[u8], chunk_len: usize) -> Vec<Vec<u8>> {
    let mut lines: Vec<Vec<u8>> = payload.chunks(chunk_len).map(encode_line).collect();
    lines.push(encode_line(SENTINEL));
    lines
}

// ============================================================================
// States
// ============================================================================

pub struct TransmitChunk;
pub struct SendSentinel;
pub struct CollectEcho;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    payload: Vec<u8>,
    // Read offset into the payload; the sender's only cross-chunk state
    offset: usize,
    chunk_len: usize,
    chunk_delay_ms: u64,
    echo: Vec<u8>,
    bits_sent: u64,
    started: Instant,
    debug: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            serial: self.serial,
            payload: self.payload,
            offset: self.offset,
            chunk_len: self.chunk_len,
            chunk_delay_ms: self.chunk_delay_ms,
            echo: self.echo,
            bits_sent: self.bits_sent,
            started: self.started,
            debug: self.debug,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<TransmitChunk> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        if fsm.offset >= fsm.payload.len() {
            let next = fsm.transition::<SendSentinel>();
            return Ok(next as Box<dyn SenderState>);
        }

        let end = (fsm.offset + fsm.chunk_len).min(fsm.payload.len());
        let line = encode_line(&fsm.payload[fsm.offset..end]);
        fsm.serial.write_all(&line)?;

        fsm.bits_sent += (line.len() * 8) as u64;
        if fsm.debug {
            let elapsed = fsm.started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                println!(
                    "Sent chunk ({} bytes, offset {}/{}) - {:.0} bits/s",
                    end - fsm.offset,
                    end,
                    fsm.payload.len(),
                    fsm.bits_sent as f64 / elapsed
                );
            }
        }

        fsm.offset = end;

        // Pace the link so a slow receiver can keep up
        if fsm.chunk_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(fsm.chunk_delay_ms));
        }

        Ok(Box::new(fsm) as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<SendSentinel> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        fsm.serial.write_all(&encode_line(SENTINEL))?;
        if fsm.debug { println!("Sent: sentinel"); }

        let next = fsm.transition::<CollectEcho>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<CollectEcho> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        match fsm.serial.read_byte(Duration::from_secs(2)) {
            Ok(Some(byte)) => {
                fsm.echo.push(byte);

                if fsm.echo.ends_with(READBACK_TRAILER) {
                    let dump = &fsm.echo[..fsm.echo.len() - READBACK_TRAILER.len()];
                    println!("Readback: {} bytes", dump.len());
                    println!("{}", String::from_utf8_lossy(dump));
                    Err(SenderError::TransferComplete)
                } else {
                    Ok(Box::new(fsm) as Box<dyn SenderState>)
                }
            }
            Ok(None) => {
                // Line went quiet before the trailer arrived
                if fsm.echo.is_empty() {
                    println!("No readback received");
                } else {
                    println!("Readback truncated after {} bytes", fsm.echo.len());
                }
                Err(SenderError::TransferComplete)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl SenderFsm<TransmitChunk> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        payload: Vec<u8>,
        chunk_len: usize,
        chunk_delay_ms: u64,
        debug: bool,
    ) -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<TransmitChunk>,
            serial,
            payload,
            offset: 0,
            chunk_len,
            chunk_delay_ms,
            echo: Vec::new(),
            bits_sent: 0,
            started: Instant::now(),
            debug,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
