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
use std::time::Duration;
use crate::crc::crc16;
use crate::protocol::*;
use crate::serial::SerialPort;
use crate::store::CircularStore;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum ReceiverError {
    Io(std::io::Error),
    SessionComplete,
}

impl std::fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverError::Io(e) => write!(f, "I/O error: {}", e),
            ReceiverError::SessionComplete => write!(f, "Session complete"),
        }
    }
}

impl std::error::Error for ReceiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReceiverError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReceiverError {
    fn from(err: std::io::Error) -> Self {
        ReceiverError::Io(err)
    }
}

// ============================================================================
// Line Accumulator
// ============================================================================

/// Reassembles the incoming byte stream into complete wire lines.
///
/// A line feed on a non-empty buffer finalizes the line (the line feed
/// itself is excluded); any other byte lands at the cursor, which wraps
/// modulo the buffer size. Overflow is not an error: an overlong line
/// simply wraps onto its own start, exactly as the device firmware this
/// protocol originates from behaves.
pub struct LineBuffer {
    buf: [u8; LINE_BUFFER_SIZE],
    cursor: usize,
}

impl LineBuffer {
    pub fn new() -> LineBuffer {
        LineBuffer {
            buf: [0; LINE_BUFFER_SIZE],
            cursor: 0,
        }
    }

    /// Feed one byte; returns the completed line once a terminator arrives.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == LF && self.cursor > 0 {
            let line = self.buf[..self.cursor].to_vec();
            self.cursor = 0;
            Some(line)
        } else {
            self.buf[self.cursor] = byte;
            self.cursor = (self.cursor + 1) % LINE_BUFFER_SIZE;
            None
        }
    }
}

// ============================================================================
// Chunk Validator & Dispatcher
// ============================================================================

#[derive(Debug, PartialEq)]
pub enum ChunkOutcome {
    Accepted,
    SentinelAccepted,
    Rejected(RejectReason),
}

#[derive(Debug, PartialEq)]
pub enum RejectReason {
    ChecksumMismatch { claimed: u16, computed: u16 },
    MalformedLine,
}

/// Validate a completed line and, if it passes, append its payload to the
/// store. Rejected chunks are dropped silently; the protocol has no NAK.
///
/// The sentinel payload is stored like ordinary data before being reported,
/// matching the source protocol.
pub fn dispatch_line(line: &[u8], store: &mut CircularStore) -> ChunkOutcome {
    let sep = match line.iter().position(|&b| b == FIELD_SEPARATOR) {
        Some(idx) => idx,
        None => return ChunkOutcome::Rejected(RejectReason::MalformedLine),
    };

    let claimed = match std::str::from_utf8(&line[..sep])
        .ok()
        .and_then(|field| field.parse::<u16>().ok())
    {
        Some(value) => value,
        None => return ChunkOutcome::Rejected(RejectReason::MalformedLine),
    };

    let payload = &line[sep + 1..];
    let computed = crc16(payload);

    if claimed != computed {
        return ChunkOutcome::Rejected(RejectReason::ChecksumMismatch { claimed, computed });
    }

    store.append(payload);

    if payload == SENTINEL {
        ChunkOutcome::SentinelAccepted
    } else {
        ChunkOutcome::Accepted
    }
}

// ============================================================================
// States
// ============================================================================

pub struct Accumulate;
pub struct Validate;
pub struct Respond;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    line: LineBuffer,
    store: CircularStore,
    // Completed line awaiting validation
    pending: Vec<u8>,
    transmission_complete: bool,
    once: bool,
    debug: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            serial: self.serial,
            line: self.line,
            store: self.store,
            pending: self.pending,
            transmission_complete: self.transmission_complete,
            once: self.once,
            debug: self.debug,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<Accumulate> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        match fsm.serial.read_byte(Duration::from_millis(100)) {
            Ok(Some(byte)) => {
                if let Some(line) = fsm.line.feed(byte) {
                    fsm.pending = line;
                    let next = fsm.transition::<Validate>();
                    Ok(next as Box<dyn ReceiverState>)
                } else {
                    Ok(Box::new(fsm) as Box<dyn ReceiverState>)
                }
            }
            // Readback only starts once the input has drained
            Ok(None) if fsm.transmission_complete => {
                let next = fsm.transition::<Respond>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Ok(None) => Ok(Box::new(fsm) as Box<dyn ReceiverState>),
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

impl ReceiverState for ReceiverFsm<Validate> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let line = std::mem::take(&mut fsm.pending);
        let outcome = dispatch_line(&line, &mut fsm.store);
        if fsm.debug { println!("Line ({} bytes): {:?}", line.len(), outcome); }

        if outcome == ChunkOutcome::SentinelAccepted {
            fsm.transmission_complete = true;
        }

        let next = fsm.transition::<Accumulate>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<Respond> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        fsm.serial.write_all(fsm.store.snapshot())?;
        fsm.serial.write_all(READBACK_TRAILER)?;
        if fsm.debug {
            println!("Sent: {} byte store dump + trailer", fsm.store.capacity());
        }

        fsm.transmission_complete = false;
        fsm.store.reset_cursor();

        if fsm.once {
            Err(ReceiverError::SessionComplete)
        } else {
            let next = fsm.transition::<Accumulate>();
            Ok(next as Box<dyn ReceiverState>)
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ReceiverFsm<Accumulate> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        capacity: usize,
        once: bool,
        debug: bool,
    ) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<Accumulate>,
            serial,
            line: LineBuffer::new(),
            store: CircularStore::new(capacity),
            pending: Vec::new(),
            transmission_complete: false,
            once,
            debug,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{encode_line, frame_lines};
    use crate::serial::MockSerialPort;

    fn run_receiver(mut fsm: Box<dyn ReceiverState>) -> Result<(), ReceiverError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(ReceiverError::SessionComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn script_from_lines(lines: &[Vec<u8>]) -> Vec<Option<u8>> {
        lines
            .iter()
            .flatten()
            .map(|&byte| Some(byte))
            .collect()
    }

    #[test]
    fn test_line_buffer_completes_on_line_feed() {
        let mut line = LineBuffer::new();

        for &byte in b"34692,AB" {
            assert_eq!(line.feed(byte), None);
        }
        assert_eq!(line.feed(b'\n'), Some(b"34692,AB".to_vec()));

        // Buffer resets for the next line
        for &byte in b"X" {
            assert_eq!(line.feed(byte), None);
        }
        assert_eq!(line.feed(b'\n'), Some(b"X".to_vec()));
    }

    #[test]
    fn test_line_buffer_buffers_leading_line_feed() {
        // A line feed on an empty buffer is ordinary data, as on the device
        let mut line = LineBuffer::new();
        assert_eq!(line.feed(b'\n'), None);
        line.feed(b'a');
        assert_eq!(line.feed(b'\n'), Some(b"\na".to_vec()));
    }

    #[test]
    fn test_line_buffer_overflow_wraps() {
        let mut line = LineBuffer::new();

        for _ in 0..LINE_BUFFER_SIZE {
            line.feed(b'a');
        }
        // Cursor has wrapped to 0; these land on the front
        for &byte in b"bbbb" {
            line.feed(byte);
        }

        assert_eq!(line.feed(b'\n'), Some(b"bbbb".to_vec()));
    }

    #[test]
    fn test_dispatch_accepts_valid_chunk() {
        let mut store = CircularStore::new(8);
        assert_eq!(dispatch_line(b"34692,AB", &mut store), ChunkOutcome::Accepted);
        assert_eq!(store.snapshot(), b"AB\0\0\0\0\0\0");
    }

    #[test]
    fn test_dispatch_stores_sentinel_like_data() {
        let mut store = CircularStore::new(8);
        assert_eq!(
            dispatch_line(b"11993,END", &mut store),
            ChunkOutcome::SentinelAccepted
        );
        assert_eq!(store.snapshot(), b"END\0\0\0\0\0");
    }

    #[test]
    fn test_dispatch_rejects_checksum_mismatch() {
        let mut store = CircularStore::new(8);
        assert_eq!(
            dispatch_line(b"34692,AC", &mut store),
            ChunkOutcome::Rejected(RejectReason::ChecksumMismatch {
                claimed: 34692,
                computed: crc16(b"AC"),
            })
        );
        // Dropped chunks leave the store untouched
        assert_eq!(store.cursor(), 0);
        assert!(store.snapshot().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_dispatch_rejects_malformed_lines() {
        let mut store = CircularStore::new(8);

        let malformed: [&[u8]; 4] = [b"abc,XY", b"no separator", b"99999,AB", b",AB"];
        for line in malformed {
            assert_eq!(
                dispatch_line(line, &mut store),
                ChunkOutcome::Rejected(RejectReason::MalformedLine),
                "line {:?} should be malformed",
                String::from_utf8_lossy(line)
            );
        }
        assert_eq!(store.cursor(), 0);
    }

    #[test]
    fn test_dispatch_splits_on_first_separator_only() {
        // Payload may legally contain no separator, but everything after the
        // first comma is payload either way
        let mut store = CircularStore::new(8);
        let line = encode_line(b"a,b");
        assert_eq!(
            dispatch_line(&line[..line.len() - 1], &mut store),
            ChunkOutcome::Accepted
        );
        assert_eq!(store.snapshot(), b"a,b\0\0\0\0\0");
    }

    #[test]
    fn test_frame_then_dispatch_round_trip() {
        let mut store = CircularStore::new(64);
        let lines = frame_lines(b"The quick brown fox", 8);

        for (idx, line) in lines.iter().enumerate() {
            let outcome = dispatch_line(&line[..line.len() - 1], &mut store);
            if idx == lines.len() - 1 {
                assert_eq!(outcome, ChunkOutcome::SentinelAccepted);
            } else {
                assert_eq!(outcome, ChunkOutcome::Accepted);
            }
        }

        assert_eq!(&store.snapshot()[..22], b"The quick brown foxEND");
    }

    #[test]
    fn test_tampered_payload_always_rejected() {
        let mut store = CircularStore::new(8);
        let mut line = encode_line(b"AB");
        // Flip one payload byte after the CRC was computed
        let payload_start = line.iter().position(|&b| b == b',').unwrap() + 1;
        line[payload_start] ^= 0x01;

        match dispatch_line(&line[..line.len() - 1], &mut store) {
            ChunkOutcome::Rejected(RejectReason::ChecksumMismatch { .. }) => {}
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
        assert_eq!(store.cursor(), 0);
    }

    #[test]
    fn test_receiver_full_session() {
        let script = script_from_lines(&frame_lines(b"AB", 2));

        let mut expected_writes = b"ABEND\0\0\0".to_vec();
        expected_writes.extend_from_slice(READBACK_TRAILER);

        let mock_serial = Box::new(MockSerialPort::new(script, expected_writes));
        let fsm = ReceiverFsm::new(mock_serial, 8, true, true);

        run_receiver(fsm).expect("session should complete");
    }

    #[test]
    fn test_receiver_wraparound_session() {
        // Ten payload bytes plus the stored sentinel into an 8-byte store
        let script = script_from_lines(&frame_lines(b"ABCDEFGHIJ", 10));

        let mut expected_writes = b"IJENDFGH".to_vec();
        expected_writes.extend_from_slice(READBACK_TRAILER);

        let mock_serial = Box::new(MockSerialPort::new(script, expected_writes));
        let fsm = ReceiverFsm::new(mock_serial, 8, true, false);

        run_receiver(fsm).expect("session should complete");
    }

    #[test]
    fn test_receiver_drops_corrupt_chunk_silently() {
        let mut tampered = encode_line(b"AB");
        tampered[6] = b'C';

        let script = script_from_lines(&[tampered, encode_line(SENTINEL)]);

        // Only the sentinel bytes make it into the store
        let mut expected_writes = b"END\0\0\0\0\0".to_vec();
        expected_writes.extend_from_slice(READBACK_TRAILER);

        let mock_serial = Box::new(MockSerialPort::new(script, expected_writes));
        let fsm = ReceiverFsm::new(mock_serial, 8, true, false);

        run_receiver(fsm).expect("session should complete");
    }

    #[test]
    fn test_receiver_survives_malformed_line() {
        let script = script_from_lines(&[b"abc,XY\n".to_vec(), encode_line(SENTINEL)]);

        let mut expected_writes = b"END\0\0\0\0\0".to_vec();
        expected_writes.extend_from_slice(READBACK_TRAILER);

        let mock_serial = Box::new(MockSerialPort::new(script, expected_writes));
        let fsm = ReceiverFsm::new(mock_serial, 8, true, false);

        run_receiver(fsm).expect("session should complete");
    }

    #[test]
    fn test_receiver_replay_is_idempotent() {
        let recorded = script_from_lines(&frame_lines(b"Hello, w", 4));

        let mut expected_writes = b"Hello, wEND\0\0\0\0\0".to_vec();
        expected_writes.extend_from_slice(READBACK_TRAILER);

        for _ in 0..2 {
            let mock_serial = Box::new(MockSerialPort::new(
                recorded.clone(),
                expected_writes.clone(),
            ));
            let fsm = ReceiverFsm::new(mock_serial, 16, true, false);
            run_receiver(fsm).expect("session should complete");
        }
    }

    #[test]
    fn test_receiver_serves_back_to_back_sessions() {
        // Two sessions over one port; the cursor resets between them, so the
        // second transfer overwrites the first from offset 0
        let mut script = script_from_lines(&frame_lines(b"AB", 2));
        script.push(None); // input drains, first readback fires
        script.extend(script_from_lines(&frame_lines(b"AB", 2)));
        script.push(None);

        let mut expected_writes = Vec::new();
        for _ in 0..2 {
            expected_writes.extend_from_slice(b"ABEND\0\0\0");
            expected_writes.extend_from_slice(READBACK_TRAILER);
        }

        let mock_serial = Box::new(MockSerialPort::new(script, expected_writes));
        let mut fsm = ReceiverFsm::new(mock_serial, 8, false, false);

        // 19 wire bytes + drain poll, 2 validations and 1 readback per session
        for _ in 0..46 {
            fsm = fsm.step().expect("step should succeed");
        }
    }
}
