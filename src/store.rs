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

//! Fixed-capacity circular store for accepted chunk payloads.
//!
//! Models the device's persistent byte region: a zero-initialized array of
//! `capacity` bytes plus a single write cursor that wraps modulo capacity.
//! Writing past capacity overwrites from offset 0; that is the defined
//! capacity policy of the protocol, not a fault.

/// Circular byte store with a persisted write cursor.
pub struct CircularStore {
    data: Vec<u8>,
    cursor: usize,
}

impl CircularStore {
    /// Create a zero-filled store. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> CircularStore {
        assert!(capacity > 0, "store capacity must be non-zero");
        CircularStore {
            data: vec![0; capacity],
            cursor: 0,
        }
    }

    /// Append `bytes` at the cursor, wrapping modulo capacity.
    pub fn append(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.data[self.cursor] = byte;
            self.cursor = (self.cursor + 1) % self.data.len();
        }
    }

    /// The full capacity-sized region, verbatim, including any
    /// never-written zeroed tail.
    pub fn snapshot(&self) -> &[u8] {
        &self.data
    }

    /// Next write offset.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Re-initialize the cursor for a new session. Store contents are
    /// left in place; the next session overwrites them as it goes.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_capacity() {
        let mut store = CircularStore::new(8);
        store.append(b"abc");

        assert_eq!(store.snapshot(), b"abc\0\0\0\0\0");
        assert_eq!(store.cursor(), 3);
    }

    #[test]
    fn test_snapshot_is_always_full_capacity() {
        let store = CircularStore::new(16);
        assert_eq!(store.snapshot().len(), 16);
        assert!(store.snapshot().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wraparound_overwrites_from_start() {
        let mut store = CircularStore::new(8);
        store.append(b"ABCDEFGHIJ");

        // Ten bytes into eight slots: I and J land back on offsets 0 and 1
        assert_eq!(store.snapshot(), b"IJCDEFGH");
        assert_eq!(store.cursor(), 2);
    }

    #[test]
    fn test_cursor_advances_across_appends() {
        let mut store = CircularStore::new(8);
        store.append(b"ABCDE");
        store.append(b"FGHIJ");

        assert_eq!(store.snapshot(), b"IJCDEFGH");
        assert_eq!(store.cursor(), 2);
    }

    #[test]
    fn test_reset_cursor_keeps_contents() {
        let mut store = CircularStore::new(8);
        store.append(b"ABCDEFGH");
        store.reset_cursor();

        assert_eq!(store.cursor(), 0);
        assert_eq!(store.snapshot(), b"ABCDEFGH");

        store.append(b"xy");
        assert_eq!(store.snapshot(), b"xyCDEFGH");
    }

    #[test]
    fn test_empty_append_is_noop() {
        let mut store = CircularStore::new(4);
        store.append(b"");
        assert_eq!(store.cursor(), 0);
        assert_eq!(store.snapshot(), b"\0\0\0\0");
    }
}
