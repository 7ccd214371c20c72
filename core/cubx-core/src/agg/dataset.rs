//! Segment value storage strategies.
//!
//! A dataset is permanently dense (typed array plus a presence bitmap) or
//! sparse (coordinate map) from the moment it is created; there are no
//! transitions. Dense numeric storage keeps a presence bitmap addressed by
//! the same row-major offset as the value array, so "no value" is distinct
//! from a legitimate zero.

use crate::agg::cell::CellKey;
use crate::error::{CubxError, CubxResult};
use crate::value::{CellValue, Datatype};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Above this cell count a segment is a sparse candidate at all.
pub const SPARSE_COUNT_THRESHOLD: u64 = 1_000;

/// Density ratio below which a sparse candidate actually goes sparse.
pub const SPARSE_DENSITY_THRESHOLD: f64 = 0.5;

/// Hard cap on dense storage: offsets must stay addressable by a 32-bit
/// signed index.
pub const MAX_DENSE_CELLS: u64 = i32::MAX as u64;

/// Decide the storage strategy for a segment with `total_cells` addressable
/// cells of which `actual_cells` hold data.
///
/// Anything beyond [`MAX_DENSE_CELLS`] must be sparse regardless of density.
/// At or below [`SPARSE_COUNT_THRESHOLD`] total cells the answer is always
/// dense; above it, density decides.
pub fn use_sparse(total_cells: u64, actual_cells: u64) -> bool {
    if total_cells > MAX_DENSE_CELLS {
        return true;
    }
    total_cells > SPARSE_COUNT_THRESHOLD
        && (actual_cells as f64) < (total_cells as f64) * SPARSE_DENSITY_THRESHOLD
}

/// Presence bitmap for dense storage, addressed by row-major offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceBits {
    words: Vec<u64>,
}

impl PresenceBits {
    pub fn with_len(bits: usize) -> Self {
        PresenceBits {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    pub fn set(&mut self, offset: usize) {
        self.words[offset / 64] |= 1u64 << (offset % 64);
    }

    pub fn clear(&mut self, offset: usize) {
        self.words[offset / 64] &= !(1u64 << (offset % 64));
    }

    pub fn get(&self, offset: usize) -> bool {
        self.words[offset / 64] & (1u64 << (offset % 64)) != 0
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Row-major geometry shared by the dense variants. The last axis varies
/// fastest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseGeometry {
    sizes: Vec<usize>,
    multipliers: Vec<usize>,
}

impl DenseGeometry {
    fn new(axis_sizes: &[usize]) -> Self {
        let mut multipliers = vec![1usize; axis_sizes.len()];
        for i in (0..axis_sizes.len().saturating_sub(1)).rev() {
            multipliers[i] = multipliers[i + 1] * axis_sizes[i + 1];
        }
        DenseGeometry {
            sizes: axis_sizes.to_vec(),
            multipliers,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.sizes.iter().product()
    }

    pub fn axis_sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn offset(&self, key: &CellKey) -> Option<usize> {
        if key.len() != self.sizes.len() {
            return None;
        }
        let mut offset = 0usize;
        for (axis, &coordinate) in key.coordinates().iter().enumerate() {
            if coordinate as usize >= self.sizes[axis] {
                return None;
            }
            offset += coordinate as usize * self.multipliers[axis];
        }
        Some(offset)
    }

    fn decode(&self, mut offset: usize) -> CellKey {
        let mut coordinates = Vec::with_capacity(self.sizes.len());
        for &multiplier in &self.multipliers {
            coordinates.push((offset / multiplier) as u32);
            offset %= multiplier;
        }
        CellKey::new(coordinates)
    }
}

/// Value storage for one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SegmentDataset {
    DenseInt {
        geometry: DenseGeometry,
        values: Vec<i64>,
        present: PresenceBits,
    },
    DenseReal {
        geometry: DenseGeometry,
        values: Vec<f64>,
        present: PresenceBits,
    },
    DenseObject {
        geometry: DenseGeometry,
        values: Vec<Option<CellValue>>,
    },
    Sparse {
        values: HashMap<CellKey, CellValue>,
    },
}

impl SegmentDataset {
    pub fn dense_int(axis_sizes: &[usize]) -> Self {
        let geometry = DenseGeometry::new(axis_sizes);
        let n = geometry.cell_count();
        SegmentDataset::DenseInt {
            geometry,
            values: vec![0; n],
            present: PresenceBits::with_len(n),
        }
    }

    pub fn dense_real(axis_sizes: &[usize]) -> Self {
        let geometry = DenseGeometry::new(axis_sizes);
        let n = geometry.cell_count();
        SegmentDataset::DenseReal {
            geometry,
            values: vec![0.0; n],
            present: PresenceBits::with_len(n),
        }
    }

    pub fn dense_object(axis_sizes: &[usize]) -> Self {
        let geometry = DenseGeometry::new(axis_sizes);
        let n = geometry.cell_count();
        SegmentDataset::DenseObject {
            geometry,
            values: vec![None; n],
        }
    }

    pub fn sparse() -> Self {
        SegmentDataset::Sparse {
            values: HashMap::new(),
        }
    }

    /// Choose and allocate storage for a fresh segment load: sparse when
    /// [`use_sparse`] says so, else the dense variant for `datatype`.
    pub fn for_load(
        datatype: Datatype,
        axis_sizes: &[usize],
        actual_cells: u64,
    ) -> CubxResult<Self> {
        let total: u64 = axis_sizes
            .iter()
            .try_fold(1u64, |acc, &n| acc.checked_mul(n as u64))
            .ok_or(CubxError::LimitExceeded {
                cells: u64::MAX,
                max: MAX_DENSE_CELLS,
            })?;
        if use_sparse(total, actual_cells) {
            return Ok(SegmentDataset::sparse());
        }
        Ok(match datatype {
            Datatype::Int => SegmentDataset::dense_int(axis_sizes),
            Datatype::Real => SegmentDataset::dense_real(axis_sizes),
            Datatype::Str | Datatype::Bool => SegmentDataset::dense_object(axis_sizes),
        })
    }

    /// Store a value. A null value marks the cell absent.
    pub fn put(&mut self, key: &CellKey, value: CellValue) -> CubxResult<()> {
        match self {
            SegmentDataset::DenseInt {
                geometry,
                values,
                present,
            } => {
                let offset = geometry
                    .offset(key)
                    .ok_or_else(|| CubxError::CoordinateOutOfRange(key.to_string()))?;
                match value {
                    CellValue::Null => present.clear(offset),
                    CellValue::Int(v) => {
                        values[offset] = v;
                        present.set(offset);
                    }
                    other => {
                        return Err(CubxError::DatatypeMismatch {
                            expected: Datatype::Int.to_string(),
                            actual: datatype_name(&other),
                        });
                    }
                }
                Ok(())
            }
            SegmentDataset::DenseReal {
                geometry,
                values,
                present,
            } => {
                let offset = geometry
                    .offset(key)
                    .ok_or_else(|| CubxError::CoordinateOutOfRange(key.to_string()))?;
                match value {
                    CellValue::Null => present.clear(offset),
                    CellValue::Real(v) => {
                        values[offset] = v;
                        present.set(offset);
                    }
                    CellValue::Int(v) => {
                        values[offset] = v as f64;
                        present.set(offset);
                    }
                    other => {
                        return Err(CubxError::DatatypeMismatch {
                            expected: Datatype::Real.to_string(),
                            actual: datatype_name(&other),
                        });
                    }
                }
                Ok(())
            }
            SegmentDataset::DenseObject { geometry, values } => {
                let offset = geometry
                    .offset(key)
                    .ok_or_else(|| CubxError::CoordinateOutOfRange(key.to_string()))?;
                values[offset] = match value {
                    CellValue::Null => None,
                    v => Some(v),
                };
                Ok(())
            }
            SegmentDataset::Sparse { values } => {
                match value {
                    CellValue::Null => {
                        values.remove(key);
                    }
                    v => {
                        values.insert(key.clone(), v);
                    }
                }
                Ok(())
            }
        }
    }

    /// The stored value, if the cell exists and is non-null.
    pub fn get(&self, key: &CellKey) -> Option<CellValue> {
        match self {
            SegmentDataset::DenseInt {
                geometry,
                values,
                present,
            } => {
                let offset = geometry.offset(key)?;
                present.get(offset).then(|| CellValue::Int(values[offset]))
            }
            SegmentDataset::DenseReal {
                geometry,
                values,
                present,
            } => {
                let offset = geometry.offset(key)?;
                present.get(offset).then(|| CellValue::Real(values[offset]))
            }
            SegmentDataset::DenseObject { geometry, values } => {
                let offset = geometry.offset(key)?;
                values[offset].clone()
            }
            SegmentDataset::Sparse { values } => values.get(key).cloned(),
        }
    }

    /// Whether the coordinate is addressable by this dataset at all.
    pub fn exists(&self, key: &CellKey) -> bool {
        match self {
            SegmentDataset::DenseInt { geometry, .. }
            | SegmentDataset::DenseReal { geometry, .. }
            | SegmentDataset::DenseObject { geometry, .. } => geometry.offset(key).is_some(),
            SegmentDataset::Sparse { values } => values.contains_key(key),
        }
    }

    /// Whether the cell holds no value.
    pub fn is_null(&self, key: &CellKey) -> bool {
        self.get(key).is_none()
    }

    /// Copy one cell from another dataset, converting representation as
    /// needed. Used while rows stream in during incremental population.
    pub fn populate_from(
        &mut self,
        destination: &CellKey,
        source: &SegmentDataset,
        source_key: &CellKey,
    ) -> CubxResult<()> {
        match source.get(source_key) {
            Some(value) => self.put(destination, value),
            None => Ok(()),
        }
    }

    /// Number of populated cells.
    pub fn cell_count(&self) -> usize {
        match self {
            SegmentDataset::DenseInt { present, .. } | SegmentDataset::DenseReal { present, .. } => {
                present.count()
            }
            SegmentDataset::DenseObject { values, .. } => {
                values.iter().filter(|v| v.is_some()).count()
            }
            SegmentDataset::Sparse { values } => values.len(),
        }
    }

    /// Enumerate populated cells as `(key, value)` pairs. Dense enumeration
    /// is in ascending offset order; sparse order is unspecified.
    pub fn cells(&self) -> Vec<(CellKey, CellValue)> {
        match self {
            SegmentDataset::DenseInt {
                geometry,
                values,
                present,
            } => values
                .iter()
                .enumerate()
                .filter(|(offset, _)| present.get(*offset))
                .map(|(offset, v)| (geometry.decode(offset), CellValue::Int(*v)))
                .collect(),
            SegmentDataset::DenseReal {
                geometry,
                values,
                present,
            } => values
                .iter()
                .enumerate()
                .filter(|(offset, _)| present.get(*offset))
                .map(|(offset, v)| (geometry.decode(offset), CellValue::Real(*v)))
                .collect(),
            SegmentDataset::DenseObject { geometry, values } => values
                .iter()
                .enumerate()
                .filter_map(|(offset, v)| {
                    v.as_ref().map(|v| (geometry.decode(offset), v.clone()))
                })
                .collect(),
            SegmentDataset::Sparse { values } => values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, SegmentDataset::Sparse { .. })
    }
}

impl PartialEq for SegmentDataset {
    /// Value-level comparison across representations: a dense and a sparse
    /// dataset holding the same cells are equal.
    fn eq(&self, other: &Self) -> bool {
        let mut mine = self.cells();
        let mut theirs = other.cells();
        mine.sort_by(|a, b| a.0.cmp(&b.0));
        theirs.sort_by(|a, b| a.0.cmp(&b.0));
        mine == theirs
    }
}

fn datatype_name(value: &CellValue) -> String {
    match value.datatype() {
        Some(d) => d.to_string(),
        None => "Null".to_string(),
    }
}
