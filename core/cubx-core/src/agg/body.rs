//! Segment bodies — the stored values plus per-axis observed value sets.

use crate::agg::cell::CellKey;
use crate::agg::dataset::SegmentDataset;
use crate::error::{CubxError, CubxResult};
use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One axis of a segment body: the distinct non-null values observed (or
/// requested) on that axis, sorted ascending, plus a null flag. The null
/// slot, when present, is the extra ordinal after the last value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAxis {
    values: Vec<CellValue>,
    has_null: bool,
    /// Set when a rollup could not preserve the exact column predicate for
    /// this axis; the value list is then the observed set, not a constraint.
    lost_predicate: bool,
}

impl SegmentAxis {
    pub fn new<I: IntoIterator<Item = CellValue>>(values: I, has_null: bool) -> Self {
        let mut values: Vec<CellValue> = values.into_iter().filter(|v| !v.is_null()).collect();
        values.sort();
        values.dedup();
        SegmentAxis {
            values,
            has_null,
            lost_predicate: false,
        }
    }

    pub fn with_lost_predicate(mut self) -> Self {
        self.lost_predicate = true;
        self
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn has_null(&self) -> bool {
        self.has_null
    }

    pub fn lost_predicate(&self) -> bool {
        self.lost_predicate
    }

    /// Number of addressable ordinals on this axis (values plus the null
    /// slot if present).
    pub fn size(&self) -> usize {
        self.values.len() + usize::from(self.has_null)
    }

    /// The ordinal for a value on this axis. Null maps to the slot after the
    /// last value when the axis carries one.
    pub fn ordinal_of(&self, value: &CellValue) -> Option<u32> {
        if value.is_null() {
            return self.has_null.then(|| self.values.len() as u32);
        }
        self.values.binary_search(value).ok().map(|i| i as u32)
    }

    /// The value at an axis ordinal; the null slot yields `CellValue::Null`.
    pub fn value_at(&self, ordinal: u32) -> Option<CellValue> {
        let i = ordinal as usize;
        if i < self.values.len() {
            Some(self.values[i].clone())
        } else if i == self.values.len() && self.has_null {
            Some(CellValue::Null)
        } else {
            None
        }
    }
}

/// The actual value storage of one segment.
///
/// Bodies are built once during a single-writer load and never mutated after
/// publication; every field accessor is read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBody {
    axes: Vec<SegmentAxis>,
    data: SegmentDataset,
}

impl SegmentBody {
    pub fn new(axes: Vec<SegmentAxis>, data: SegmentDataset) -> Self {
        SegmentBody { axes, data }
    }

    pub fn axes(&self) -> &[SegmentAxis] {
        &self.axes
    }

    pub fn data(&self) -> &SegmentDataset {
        &self.data
    }

    /// The distinct observed values per axis.
    pub fn axis_value_sets(&self) -> Vec<BTreeSet<CellValue>> {
        self.axes
            .iter()
            .map(|axis| axis.values.iter().cloned().collect())
            .collect()
    }

    /// Per-axis null flags.
    pub fn null_axis_flags(&self) -> Vec<bool> {
        self.axes.iter().map(|axis| axis.has_null).collect()
    }

    pub fn cell_count(&self) -> usize {
        self.data.cell_count()
    }

    /// Total addressable cells (product of axis sizes).
    pub fn addressable_cells(&self) -> u64 {
        self.axes.iter().map(|axis| axis.size() as u64).product()
    }

    /// Value at a coordinate of axis ordinals.
    pub fn get(&self, key: &CellKey) -> Option<CellValue> {
        self.data.get(key)
    }

    /// Value at a coordinate of axis values, resolving each value to its
    /// axis ordinal first.
    pub fn get_by_values(&self, values: &[CellValue]) -> CubxResult<Option<CellValue>> {
        if values.len() != self.axes.len() {
            return Err(CubxError::CoordinateOutOfRange(format!(
                "{} coordinates for {} axes",
                values.len(),
                self.axes.len()
            )));
        }
        let mut coordinates = Vec::with_capacity(values.len());
        for (axis, value) in self.axes.iter().zip(values.iter()) {
            match axis.ordinal_of(value) {
                Some(ordinal) => coordinates.push(ordinal),
                None => return Ok(None),
            }
        }
        Ok(self.get(&CellKey::new(coordinates)))
    }

    /// All populated cells as `(key, value)` pairs.
    pub fn cell_values(&self) -> Vec<(CellKey, CellValue)> {
        self.data.cells()
    }

    /// Translate a cell key into the axis values it addresses.
    pub fn key_to_values(&self, key: &CellKey) -> CubxResult<Vec<CellValue>> {
        if key.len() != self.axes.len() {
            return Err(CubxError::CoordinateOutOfRange(key.to_string()));
        }
        let mut values = Vec::with_capacity(key.len());
        for (axis, &ordinal) in self.axes.iter().zip(key.coordinates().iter()) {
            match axis.value_at(ordinal) {
                Some(value) => values.push(value),
                None => return Err(CubxError::CoordinateOutOfRange(key.to_string())),
            }
        }
        Ok(values)
    }

    /// Serialize for an external cache store.
    pub fn to_bytes(&self) -> CubxResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> CubxResult<SegmentBody> {
        Ok(bincode::deserialize(bytes)?)
    }
}
