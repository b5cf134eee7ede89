//! Outbound map transfer
//!
//! Splits the map into row fragments small enough for one frame.

use super::{IgnitionMap, MAP_SIZE};
use crate::protocol::{Command, Packet, PAYLOAD_SIZE};

/// Floats per fragment: one row byte plus 13 x 4 bytes = 53 <= 55
pub const MAX_VALUES_PER_FRAGMENT: usize = (PAYLOAD_SIZE - 1) / 4;

/// One slice of a map row
#[derive(Debug, Clone, PartialEq)]
pub struct MapFragment {
    /// Row index
    pub row: u8,
    /// Column of the first value (not sent on the wire)
    pub start_col: usize,
    /// Values in column order
    pub values: Vec<f32>,
}

impl MapFragment {
    /// Wire payload: row byte followed by little-endian floats
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(1 + self.values.len() * 4);
        payload.push(self.row);
        for v in &self.values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload
    }

    /// Packet sending this fragment to the device
    pub fn to_packet(&self) -> Packet {
        Packet::new(Command::SendMapData, self.to_payload())
    }
}

/// Fragments for every row, rows 0..31, columns in increasing order
///
/// The caller finishes the transfer with a `MapTransferComplete` command.
pub fn chunk_map(map: &IgnitionMap) -> impl Iterator<Item = MapFragment> + '_ {
    map.rows().enumerate().flat_map(|(row, cells)| {
        cells
            .chunks(MAX_VALUES_PER_FRAGMENT)
            .enumerate()
            .map(move |(i, values)| MapFragment {
                row: row as u8,
                start_col: i * MAX_VALUES_PER_FRAGMENT,
                values: values.to_vec(),
            })
    })
}

/// Number of fragments one full map produces
pub fn fragments_per_map() -> usize {
    MAP_SIZE * MAP_SIZE.div_ceil(MAX_VALUES_PER_FRAGMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapReassembler;

    #[test]
    fn test_fragment_size_fits_payload() {
        assert_eq!(MAX_VALUES_PER_FRAGMENT, 13);
        assert!(1 + 4 * MAX_VALUES_PER_FRAGMENT <= PAYLOAD_SIZE);
    }

    #[test]
    fn test_three_fragments_per_row() {
        let map = IgnitionMap::from_fn(|row, col| (row + col) as f32);
        let fragments: Vec<MapFragment> = chunk_map(&map).collect();

        assert_eq!(fragments.len(), 96);
        assert_eq!(fragments.len(), fragments_per_map());

        let row5: Vec<&MapFragment> = fragments.iter().filter(|f| f.row == 5).collect();
        let sizes: Vec<usize> = row5.iter().map(|f| f.values.len()).collect();
        let starts: Vec<usize> = row5.iter().map(|f| f.start_col).collect();
        assert_eq!(sizes, vec![13, 13, 6]);
        assert_eq!(starts, vec![0, 13, 26]);
    }

    #[test]
    fn test_rows_in_order() {
        let map = IgnitionMap::new();
        let rows: Vec<u8> = chunk_map(&map).map(|f| f.row).collect();
        let mut sorted = rows.clone();
        sorted.sort();
        assert_eq!(rows, sorted);
        assert_eq!(rows.first(), Some(&0));
        assert_eq!(rows.last(), Some(&31));
    }

    #[test]
    fn test_payload_layout() {
        let fragment = MapFragment {
            row: 9,
            start_col: 0,
            values: vec![1.5, -2.25],
        };
        let payload = fragment.to_payload();
        assert_eq!(payload.len(), 9);
        assert_eq!(payload[0], 9);
        assert_eq!(&payload[1..5], &1.5f32.to_le_bytes());
        assert_eq!(&payload[5..9], &(-2.25f32).to_le_bytes());

        let packet = fragment.to_packet();
        assert_eq!(packet.command, Command::SendMapData.code());
    }

    #[test]
    fn test_chunks_reassemble_to_same_map() {
        let map = IgnitionMap::from_fn(|row, col| row as f32 * 1.25 - col as f32 * 0.5);
        let mut reassembler = MapReassembler::new(IgnitionMap::new());
        for fragment in chunk_map(&map) {
            reassembler.apply_fragment(&fragment.to_payload()).unwrap();
        }
        assert_eq!(reassembler.finish(), map);
    }
}
