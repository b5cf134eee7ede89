//! Inbound map transfer
//!
//! Fragment payload: `[row][f32 LE]*`. Fragments carry no column index;
//! the destination column comes from how many values that row has already
//! received. Fragments of one row must therefore arrive in the order they
//! were sent. Reordered fragments land in the wrong columns and nothing on
//! the wire can detect it.

use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use tracing::debug;

use super::{IgnitionMap, MAP_SIZE};
use crate::protocol::ProtocolError;

/// Outcome of applying one fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentReport {
    /// Row the fragment belongs to
    pub row: u8,
    /// Column the first value was written to
    pub start_col: usize,
    /// Floats carried by the fragment
    pub values: usize,
    /// Floats that fell past the last column and were dropped
    pub dropped: usize,
}

/// Accumulates row fragments into a staging copy of the map
///
/// The staging copy only becomes visible through [`MapReassembler::finish`],
/// so nobody observes a half-received table.
#[derive(Debug, Clone)]
pub struct MapReassembler {
    staging: IgnitionMap,
    /// Row -> next column expected
    progress: HashMap<u8, usize>,
}

impl MapReassembler {
    /// Start a transfer on top of `seed`; cells never received keep its values
    pub fn new(seed: IgnitionMap) -> Self {
        Self {
            staging: seed,
            progress: HashMap::new(),
        }
    }

    /// Apply one fragment payload
    pub fn apply_fragment(&mut self, payload: &[u8]) -> Result<FragmentReport, ProtocolError> {
        let (&row, data) = payload
            .split_first()
            .ok_or(ProtocolError::PayloadTooShort {
                what: "map fragment",
                needed: 1,
                actual: 0,
            })?;

        if row as usize >= MAP_SIZE {
            return Err(ProtocolError::InvalidRow(row));
        }

        let cursor = self.progress.entry(row).or_insert(0);
        let start_col = *cursor;
        let values = data.len() / 4;

        let mut dropped = 0;
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            if !self
                .staging
                .set(row as usize, start_col + i, LittleEndian::read_f32(chunk))
            {
                dropped += 1;
            }
        }
        *cursor += values;

        debug!(
            "Map row {}: {} values from column {} ({} dropped)",
            row, values, start_col, dropped
        );

        Ok(FragmentReport {
            row,
            start_col,
            values,
            dropped,
        })
    }

    /// Next column expected for `row`
    pub fn cursor(&self, row: u8) -> usize {
        self.progress.get(&row).copied().unwrap_or(0)
    }

    /// Rows that have received at least one fragment
    pub fn rows_started(&self) -> usize {
        self.progress.len()
    }

    /// Rows that have received all 32 columns
    pub fn rows_complete(&self) -> usize {
        self.progress.values().filter(|&&c| c >= MAP_SIZE).count()
    }

    /// Finish the transfer and hand out the assembled map
    pub fn finish(self) -> IgnitionMap {
        self.staging
    }
}
