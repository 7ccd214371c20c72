//! Cell coordinates.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Coordinate of one cell: one axis ordinal per axis, in axis declaration
/// order. Addresses dense and sparse storage uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey(SmallVec<[u32; 4]>);

impl CellKey {
    pub fn new<I: IntoIterator<Item = u32>>(coordinates: I) -> Self {
        CellKey(coordinates.into_iter().collect())
    }

    pub fn coordinates(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn coordinate(&self, axis: usize) -> u32 {
        self.0[axis]
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

impl From<&[u32]> for CellKey {
    fn from(coordinates: &[u32]) -> Self {
        CellKey(coordinates.iter().copied().collect())
    }
}
