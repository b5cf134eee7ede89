//! Ignition map
//!
//! The 32x32 spark advance table held by the ignition unit, plus the
//! machinery to move it across the wire in row fragments and to keep a
//! copy on disk.

mod chunker;
mod reassembler;
mod store;

pub use chunker::{chunk_map, fragments_per_map, MapFragment, MAX_VALUES_PER_FRAGMENT};
pub use reassembler::{FragmentReport, MapReassembler};
pub use store::MapStore;

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Rows and columns in the map
pub const MAP_SIZE: usize = 32;

/// Round to two decimals, matching the precision the firmware works in
pub fn round2(value: f32) -> f32 {
    ((value as f64 * 100.0).round() / 100.0) as f32
}

/// 32x32 ignition advance table, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f32>>", into = "Vec<Vec<f32>>")]
pub struct IgnitionMap {
    cells: [[f32; MAP_SIZE]; MAP_SIZE],
}

impl Default for IgnitionMap {
    fn default() -> Self {
        Self {
            cells: [[0.0; MAP_SIZE]; MAP_SIZE],
        }
    }
}

impl IgnitionMap {
    /// Create an all-zero map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from a function of (row, col)
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut map = Self::default();
        for (row, cells) in map.cells.iter_mut().enumerate() {
            for (col, cell) in cells.iter_mut().enumerate() {
                *cell = round2(f(row, col));
            }
        }
        map
    }

    /// Value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.cells.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Set a cell, rounding to two decimals; out-of-range writes are ignored
    pub fn set(&mut self, row: usize, col: usize, value: f32) -> bool {
        match self.cells.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(cell) => {
                *cell = round2(value);
                true
            }
            None => false,
        }
    }

    /// One row
    pub fn row(&self, row: usize) -> Option<&[f32; MAP_SIZE]> {
        self.cells.get(row)
    }

    /// All rows in order
    pub fn rows(&self) -> impl Iterator<Item = &[f32; MAP_SIZE]> {
        self.cells.iter()
    }
}

impl TryFrom<Vec<Vec<f32>>> for IgnitionMap {
    type Error = ProtocolError;

    fn try_from(rows: Vec<Vec<f32>>) -> Result<Self, Self::Error> {
        let shape_error = |row: usize, cols: usize| ProtocolError::InvalidMapShape {
            rows: rows.len(),
            row,
            cols,
        };

        if rows.len() != MAP_SIZE {
            return Err(shape_error(0, rows.first().map_or(0, Vec::len)));
        }
        if let Some((row, cols)) = rows
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|&(_, cols)| cols != MAP_SIZE)
        {
            return Err(shape_error(row, cols));
        }

        Ok(Self::from_fn(|row, col| rows[row][col]))
    }
}

impl From<IgnitionMap> for Vec<Vec<f32>> {
    fn from(map: IgnitionMap) -> Self {
        map.cells.iter().map(|row| row.to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.345), 12.35);
        assert_eq!(round2(-3.004), -3.0);
        assert_eq!(round2(7.0), 7.0);
    }

    #[test]
    fn test_set_and_get() {
        let mut map = IgnitionMap::new();
        assert!(map.set(3, 31, 10.126));
        assert_eq!(map.get(3, 31), Some(10.13));
        assert!(!map.set(32, 0, 1.0));
        assert!(!map.set(0, 32, 1.0));
        assert_eq!(map.get(32, 0), None);
    }

    #[test]
    fn test_json_shape() {
        let map = IgnitionMap::from_fn(|row, col| (row * 100 + col) as f32 / 10.0);
        let json = serde_json::to_value(&map).unwrap();
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 32);
        assert!(rows.iter().all(|r| r.as_array().unwrap().len() == 32));

        let back: IgnitionMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let mut rows = vec![vec![0.0f32; 32]; 32];
        rows[7].pop();
        let err = IgnitionMap::try_from(rows).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidMapShape {
                rows: 32,
                row: 7,
                cols: 31
            }
        ));

        assert!(IgnitionMap::try_from(vec![vec![0.0f32; 32]; 31]).is_err());
    }
}
